//! Key Builder
//!
//! Central owner of the key-naming contract. The deployment-wide prefix is
//! an explicit constructor argument so parallel instances (tests, tenants)
//! never share keys through hidden global state.

/// Builds store keys for one deployment.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// `prefix` may be empty, in which case keys are emitted bare.
    pub fn new(prefix: impl Into<String>) -> Self {
        KeyBuilder {
            prefix: prefix.into(),
        }
    }

    pub fn unprefixed() -> Self {
        KeyBuilder::new("")
    }

    fn join(&self, key: String) -> String {
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    /// Primary record: `order:{id}`.
    pub fn primary(&self, entity: &str, id: u64) -> String {
        self.join(format!("{}:{}", entity, id))
    }

    /// Membership set: `orders_by_status:{value}`.
    pub fn attr_index(&self, entity_plural: &str, attr: &str, value: &str) -> String {
        self.join(format!("{}_by_{}:{}", entity_plural, attr, value))
    }

    /// Atomic ID counter: `sequences:{entity}`.
    pub fn sequence(&self, entity_plural: &str) -> String {
        self.join(format!("sequences:{}", entity_plural))
    }

    /// Parent-scoped time-ordered order index: `bot_orders:{parentId}`.
    pub fn parent_orders(&self, parent_kind: &str, parent_id: u64) -> String {
        self.join(format!("{}_orders:{}", parent_kind, parent_id))
    }

    /// Owner-scoped time-ordered trade index: `user_trades:{userId}`.
    pub fn user_trades(&self, user_id: u64) -> String {
        self.join(format!("user_trades:{}", user_id))
    }

    /// Exchange-order-ID to internal-ID mapping.
    pub fn order_by_exchange_id(&self, exchange_order_id: &str) -> String {
        self.join(format!("order_by_exchange_id:{}", exchange_order_id))
    }

    /// Non-terminal positions of one bot.
    pub fn active_positions(&self, bot_id: u64) -> String {
        self.join(format!("active_positions:{}", bot_id))
    }

    /// Auxiliary balance map of one bot.
    pub fn bot_balances(&self, bot_id: u64) -> String {
        self.join(format!("bot_balances:{}", bot_id))
    }

    /// Username to user-ID mapping.
    pub fn user_by_username(&self, username: &str) -> String {
        self.join(format!("user_by_username:{}", username))
    }
}
