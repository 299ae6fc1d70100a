use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A buy+sell pairing kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub user_id: u64,
    pub bot_id: Option<u64>,
    pub pair: String,
    pub buy_order_id: u64,
    pub sell_order_id: Option<u64>,
    pub profit: f64,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(user_id: u64, pair: &str, buy_order_id: u64) -> Self {
        let now = Utc::now();
        Trade {
            id: 0,
            user_id,
            bot_id: None,
            pair: pair.to_string(),
            buy_order_id,
            sell_order_id: None,
            profit: 0.0,
            status: TradeStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trade_is_open() {
        let trade = Trade::new(9, "btcidr", 41);
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.buy_order_id, 41);
        assert!(trade.sell_order_id.is_none());
    }
}
