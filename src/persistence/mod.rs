//! Persistence Layer
//!
//! Entities persist as JSON records in a key-value store with secondary
//! indexes maintained alongside the primary record. The store offers no
//! multi-key transactions; consistency comes from write ordering (primary
//! record first, read-before-delete) and from index operations being
//! idempotent set adds/removes, never from locking.
//!
//! # Key Schema
//!
//! - `order:{id}`, `position:{id}`, `bot:{id}`, `trade:{id}`, `user:{id}` —
//!   primary records
//! - `orders_by_status:{status}`, `orders_by_user:{userId}`,
//!   `orders_by_pair:{pair}` — membership sets (same pattern per entity)
//! - `order_by_exchange_id:{exchangeOrderId}` — external-ID mapping
//! - `bot_orders:{botId}`, `position_orders:{positionId}`,
//!   `user_trades:{userId}` — sorted sets scored by creation-time millis
//! - `active_positions:{botId}` — non-terminal positions per bot
//! - `bot_balances:{botId}` — auxiliary balance map merged on read
//! - `sequences:{entity}` — atomic ID counters
//!
//! Every key optionally carries a deployment-wide prefix; see
//! [`keys::KeyBuilder`].
//!
//! A crash between the primary write and an index write leaves a
//! recoverable inconsistency: the entity exists but is missing from a
//! listing until the next update re-adds it. Listings hydrate members in
//! bulk and skip ids whose primary record is gone, so the reverse case
//! never surfaces to callers.

pub mod bots;
pub mod keys;
pub mod orders;
pub mod positions;
pub mod store;
pub mod trades;
pub mod users;

use thiserror::Error;

use self::store::StoreError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt {entity} record under {key}: {source}")]
    Corrupt {
        entity: &'static str,
        key: String,
        source: serde_json::Error,
    },

    #[error("{entity} {id} is in the wrong state: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        reason: String,
    },
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}
