//! Update Dispatcher
//!
//! Applies inbound push events to the repositories and notifies consumers
//! exactly once per applied event. The exchange may deliver the same event
//! twice; duplicates and anything arriving after a terminal status are
//! dropped before any write happens. Parent aggregates (position state,
//! bot counters and balances) are recomputed as a second, independent
//! update; the store offers no cross-entity transaction, so the two writes
//! are deliberately not atomic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::session::frames::OrderEvent;
use crate::domain::entities::bot::BotStatus;
use crate::domain::entities::order::{Order, OrderSide, OrderStatus, ParentRef};
use crate::domain::entities::position::PositionStatus;
use crate::persistence::bots::BotRepository;
use crate::persistence::orders::OrderRepository;
use crate::persistence::positions::PositionRepository;
use crate::persistence::RepositoryError;

/// Quote currencies this exchange lists pairs in, longest first.
const QUOTE_CURRENCIES: [&str; 2] = ["usdt", "idr"];

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("event carries unknown status {0:?}")]
    UnknownStatus(String),
}

/// Inbound frames from the private session land here.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn handle_push(&self, channel: &str, data: Value);
}

/// Fixed fan-out surface. Implemented by exactly the consumers that need
/// order updates (strategy engine, UI notifier); notification order is the
/// order of application.
#[async_trait]
pub trait OrderEventSink: Send + Sync {
    async fn on_order_update(&self, order: &Order);

    async fn on_error(&self, error: &DispatchError);
}

/// Sink of last resort: logs updates, for deployments without a UI feed.
pub struct LogSink;

#[async_trait]
impl OrderEventSink for LogSink {
    async fn on_order_update(&self, order: &Order) {
        info!(
            id = order.id,
            pair = %order.pair,
            status = %order.status,
            filled = order.filled_amount,
            "order updated"
        );
    }

    async fn on_error(&self, error: &DispatchError) {
        error!(%error, "failed to apply order event");
    }
}

pub struct UpdateDispatcher {
    orders: OrderRepository,
    positions: PositionRepository,
    bots: BotRepository,
    sink: Arc<dyn OrderEventSink>,
}

impl UpdateDispatcher {
    pub fn new(
        orders: OrderRepository,
        positions: PositionRepository,
        bots: BotRepository,
        sink: Arc<dyn OrderEventSink>,
    ) -> Self {
        UpdateDispatcher {
            orders,
            positions,
            bots,
            sink,
        }
    }

    /// Apply one push event. Returns the updated order, or `None` when the
    /// event was dropped (unknown order, duplicate delivery, or an update
    /// arriving after a terminal status).
    pub async fn apply(&self, event: &OrderEvent) -> Result<Option<Order>, DispatchError> {
        let mut order = match self.orders.get_by_exchange_id(&event.order_id).await {
            Ok(order) => order,
            // Not placed by this system, or the mapping write raced the
            // event. Acceptable loss; not retried.
            Err(RepositoryError::NotFound { .. }) => {
                debug!(exchange_order_id = %event.order_id, "event for unknown order dropped");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let new_status = OrderStatus::parse(&event.status)
            .ok_or_else(|| DispatchError::UnknownStatus(event.status.clone()))?;

        if order.status.is_terminal() {
            debug!(id = order.id, "event after terminal status dropped");
            return Ok(None);
        }
        let filled = match event.filled_amount() {
            Some(filled) => filled,
            // full fills sometimes omit the amount
            None if new_status == OrderStatus::Filled => order.amount,
            None => order.filled_amount,
        };
        if new_status == order.status && filled == order.filled_amount {
            debug!(id = order.id, "duplicate event dropped");
            return Ok(None);
        }

        let previous = order.status;
        order.status = new_status;
        order.filled_amount = filled;
        if let Some(price) = event.fill_price() {
            order.price = price;
        }
        if new_status == OrderStatus::Filled {
            order.filled_at = Some(Utc::now());
        }
        self.orders.update(&mut order, previous).await?;

        if order.status.is_terminal() {
            self.recompute_parent(&order).await?;
        }
        self.sink.on_order_update(&order).await;
        Ok(Some(order))
    }

    async fn recompute_parent(&self, order: &Order) -> Result<(), DispatchError> {
        match order.parent {
            ParentRef::Position(position_id) => self.advance_position(position_id, order).await,
            ParentRef::Bot(bot_id) => self.refresh_bot(bot_id, order).await,
            ParentRef::None => Ok(()),
        }
    }

    /// Position transitions are driven by fills of its child orders:
    /// buying → open on the entry fill, selling → closed on the exit fill.
    async fn advance_position(&self, position_id: u64, order: &Order) -> Result<(), DispatchError> {
        let mut position = self.positions.get(position_id).await?;
        let previous = position.status;

        match (position.status, order.side, order.status) {
            (PositionStatus::Pending | PositionStatus::Buying, OrderSide::Buy, OrderStatus::Filled) => {
                position.status = PositionStatus::Open;
                position.entry_price = order.price;
                position.quantity = order.filled_amount;
                position.record_price(order.price);
            }
            (PositionStatus::Selling | PositionStatus::Open, OrderSide::Sell, OrderStatus::Filled) => {
                position.status = PositionStatus::Closed;
                position.exit_price = Some(order.price);
                position.profit = (order.price - position.entry_price) * position.quantity;
                position.record_price(order.price);
                position.closed_at = Some(Utc::now());
            }
            (_, _, OrderStatus::Error) => {
                position.status = PositionStatus::Error;
            }
            // a cancelled child order does not move the position
            _ => return Ok(()),
        }
        self.positions.update(&mut position, previous).await?;

        // the closing fill also lands on the owning bot's aggregates
        if position.status == PositionStatus::Closed {
            let mut bot = self.bots.get(position.bot_id).await?;
            let bot_previous = bot.status;
            bot.stats.trades += 1;
            bot.stats.profit += position.profit;
            if position.profit > 0.0 {
                bot.stats.wins += 1;
            }
            self.bots.update(&mut bot, bot_previous).await?;
        }
        Ok(())
    }

    /// Market-maker orders hang directly off the bot: fills move its trade
    /// counter and running balances.
    async fn refresh_bot(&self, bot_id: u64, order: &Order) -> Result<(), DispatchError> {
        let mut bot = self.bots.get(bot_id).await?;
        let previous = bot.status;

        match order.status {
            OrderStatus::Filled => {
                bot.stats.trades += 1;
                if let Some((base, quote)) = split_pair(&order.pair) {
                    let base_delta;
                    let quote_delta;
                    match order.side {
                        OrderSide::Buy => {
                            base_delta = order.filled_amount;
                            quote_delta = -order.filled_amount * order.price;
                        }
                        OrderSide::Sell => {
                            base_delta = -order.filled_amount;
                            quote_delta = order.filled_amount * order.price;
                        }
                    }
                    *bot.balances.entry(base.to_string()).or_insert(0.0) += base_delta;
                    *bot.balances.entry(quote.to_string()).or_insert(0.0) += quote_delta;
                } else {
                    warn!(pair = %order.pair, "unknown quote currency; balances not adjusted");
                }
            }
            OrderStatus::Error => {
                bot.status = BotStatus::Error;
                bot.error = Some(format!("order {} failed", order.id));
            }
            _ => return Ok(()),
        }
        self.bots.update(&mut bot, previous).await?;
        Ok(())
    }
}

#[async_trait]
impl PushHandler for UpdateDispatcher {
    async fn handle_push(&self, channel: &str, data: Value) {
        match serde_json::from_value::<OrderEvent>(data) {
            Ok(event) => {
                if let Err(e) = self.apply(&event).await {
                    error!(channel, error = %e, "failed to apply push event");
                    self.sink.on_error(&e).await;
                }
            }
            Err(e) => debug!(channel, error = %e, "non-order push dropped"),
        }
    }
}

/// Split a concatenated pair like `btcidr` into base and quote.
fn split_pair(pair: &str) -> Option<(&str, &str)> {
    for quote in QUOTE_CURRENCIES {
        if let Some(base) = pair.strip_suffix(quote) {
            if !base.is_empty() {
                return Some((base, quote));
            }
        }
    }
    None
}
