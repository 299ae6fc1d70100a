//! Exchange REST Collaborator Interface
//!
//! The core treats the signed call-response API as a black box behind this
//! trait: strategies place and cancel orders through it, and the private
//! session obtains its connection token from it. Retrying failed calls is
//! the caller's decision, not the core's.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::order::{Order, OrderSide};

pub type RestResult<T> = Result<T, RestError>;

#[derive(Debug, Clone, Error)]
pub enum RestError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("exchange rejected the request: {0}")]
    Api(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

/// Acknowledgment of an accepted placement.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub exchange_order_id: String,
}

#[derive(Debug, Clone)]
pub struct AccountBalance {
    pub currency: String,
    pub available: f64,
    pub held: f64,
}

/// Blocking call-response surface of the exchange.
#[async_trait]
pub trait ExchangeRest: Send + Sync {
    /// Place an order; returns the exchange-assigned order ID.
    async fn place_order(&self, order: &Order) -> RestResult<PlacedOrder>;

    /// Cancel an open order by its exchange-assigned ID.
    async fn cancel_order(
        &self,
        pair: &str,
        exchange_order_id: &str,
        side: OrderSide,
    ) -> RestResult<()>;

    /// All account balances.
    async fn get_balance(&self) -> RestResult<Vec<AccountBalance>>;

    /// A short-lived token for authenticating the private feed.
    async fn generate_token(&self) -> RestResult<String>;
}
