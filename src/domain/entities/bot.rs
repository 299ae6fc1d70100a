use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    MarketMaker,
    PumpHunter,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotType::MarketMaker => "market_maker",
            BotType::PumpHunter => "pump_hunter",
        }
    }
}

impl std::fmt::Display for BotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Stopped => "stopped",
            BotStatus::Starting => "starting",
            BotStatus::Running => "running",
            BotStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-strategy parameter set. The tag doubles as the bot type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotParams {
    MarketMaker {
        /// Half-spread around mid, as a fraction (0.002 = 20 bps).
        spread_pct: f64,
        order_amount: f64,
        refresh_secs: u64,
    },
    PumpHunter {
        /// Volume multiple over the rolling baseline that triggers an entry.
        volume_spike: f64,
        take_profit_pct: f64,
        stop_loss_pct: f64,
    },
}

impl BotParams {
    pub fn bot_type(&self) -> BotType {
        match self {
            BotParams::MarketMaker { .. } => BotType::MarketMaker,
            BotParams::PumpHunter { .. } => BotType::PumpHunter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BotStats {
    pub trades: u64,
    pub wins: u64,
    pub profit: f64,
}

/// Bot configuration plus its running aggregates.
///
/// Balances are not part of the primary record; they live under a separate
/// `bot_balances` key and are merged in by the repository on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: u64,
    pub user_id: u64,
    /// Trading pair; empty for multi-pair strategies.
    pub pair: String,
    pub paper: bool,
    pub params: BotParams,
    #[serde(skip)]
    pub balances: HashMap<String, f64>,
    pub stats: BotStats,
    pub status: BotStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BotConfig {
    pub fn new(user_id: u64, pair: &str, paper: bool, params: BotParams) -> Self {
        let now = Utc::now();
        BotConfig {
            id: 0,
            user_id,
            pair: pair.to_string(),
            paper,
            params,
            balances: HashMap::new(),
            stats: BotStats::default(),
            status: BotStatus::Stopped,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn bot_type(&self) -> BotType {
        self.params.bot_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maker_params() -> BotParams {
        BotParams::MarketMaker {
            spread_pct: 0.002,
            order_amount: 0.001,
            refresh_secs: 30,
        }
    }

    #[test]
    fn test_new_bot_starts_stopped() {
        let bot = BotConfig::new(1, "btcidr", true, maker_params());
        assert_eq!(bot.status, BotStatus::Stopped);
        assert_eq!(bot.bot_type(), BotType::MarketMaker);
        assert_eq!(bot.stats, BotStats::default());
        assert!(bot.balances.is_empty());
    }

    #[test]
    fn test_params_tag_matches_type() {
        let hunter = BotParams::PumpHunter {
            volume_spike: 4.0,
            take_profit_pct: 0.05,
            stop_loss_pct: 0.02,
        };
        assert_eq!(hunter.bot_type(), BotType::PumpHunter);
        let json = serde_json::to_value(&hunter).unwrap();
        assert_eq!(json["type"], "pump_hunter");
    }

    #[test]
    fn test_balances_not_serialized_with_record() {
        let mut bot = BotConfig::new(1, "", true, maker_params());
        bot.balances.insert("idr".to_string(), 1_000_000.0);
        let json = serde_json::to_value(&bot).unwrap();
        assert!(json.get("balances").is_none());
        let back: BotConfig = serde_json::from_value(json).unwrap();
        assert!(back.balances.is_empty());
    }
}
