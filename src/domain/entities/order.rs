use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

/// Order lifecycle status. Filled, cancelled and error are terminal:
/// an order never leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Cancelled,
    Error,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Error => "error",
        }
    }

    /// Parse the status string the exchange uses in push events.
    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "open" => Some(OrderStatus::Open),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            "error" => Some(OrderStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Error
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to the entity that caused this order to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "parent_type", content = "parent_id", rename_all = "lowercase")]
pub enum ParentRef {
    None,
    Bot(u64),
    Position(u64),
}

impl ParentRef {
    pub fn kind(&self) -> &'static str {
        match self {
            ParentRef::None => "none",
            ParentRef::Bot(_) => "bot",
            ParentRef::Position(_) => "position",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub exchange_order_id: Option<String>,
    pub user_id: u64,
    pub pair: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: f64,
    pub amount: f64,
    pub filled_amount: f64,
    pub status: OrderStatus,
    #[serde(flatten)]
    pub parent: ParentRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        user_id: u64,
        pair: &str,
        side: OrderSide,
        order_type: OrderType,
        price: f64,
        amount: f64,
    ) -> Result<Self, ValidationError> {
        if pair.is_empty() {
            return Err(ValidationError::InvalidPair("pair is empty".to_string()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ValidationError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        // Market orders take whatever price the book offers; limit orders need one.
        if matches!(order_type, OrderType::Limit) && (!price.is_finite() || price <= 0.0) {
            return Err(ValidationError::InvalidPrice(format!(
                "limit orders need a positive price, got {}",
                price
            )));
        }
        let now = Utc::now();
        Ok(Order {
            id: 0,
            exchange_order_id: None,
            user_id,
            pair: pair.to_string(),
            side,
            order_type,
            price,
            amount,
            filled_amount: 0.0,
            status: OrderStatus::Open,
            parent: ParentRef::None,
            created_at: now,
            updated_at: now,
            filled_at: None,
        })
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = parent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_new_limit_buy() {
        let order = Order::new(3, "btcidr", OrderSide::Buy, OrderType::Limit, 650_000_000.0, 0.001)
            .unwrap();
        assert_eq!(order.id, 0);
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.filled_amount, 0.0);
        assert!(order.exchange_order_id.is_none());
        assert_eq!(order.parent, ParentRef::None);
    }

    #[test]
    fn test_order_new_limit_without_price() {
        let order = Order::new(3, "btcidr", OrderSide::Buy, OrderType::Limit, 0.0, 0.001);
        assert!(matches!(order, Err(ValidationError::InvalidPrice(_))));
    }

    #[test]
    fn test_order_new_market_without_price() {
        let order = Order::new(3, "btcidr", OrderSide::Sell, OrderType::Market, 0.0, 0.5);
        assert!(order.is_ok());
    }

    #[test]
    fn test_order_new_rejects_non_positive_amount() {
        assert!(Order::new(3, "btcidr", OrderSide::Buy, OrderType::Limit, 100.0, 0.0).is_err());
        assert!(Order::new(3, "btcidr", OrderSide::Buy, OrderType::Limit, 100.0, -1.0).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Error.is_terminal());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Open,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Error,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("done"), None);
    }

    #[test]
    fn test_parent_ref_serde_shape() {
        let order = Order::new(1, "btcidr", OrderSide::Buy, OrderType::Limit, 100.0, 1.0)
            .unwrap()
            .with_parent(ParentRef::Bot(7));
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["parent_type"], "bot");
        assert_eq!(json["parent_id"], 7);
        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back.parent, ParentRef::Bot(7));
    }
}
