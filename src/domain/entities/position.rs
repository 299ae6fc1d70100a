use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position lifecycle. Driven by fills of the position's child orders;
/// closed and error are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Pending,
    Buying,
    Open,
    Selling,
    Closed,
    Error,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Pending => "pending",
            PositionStatus::Buying => "buying",
            PositionStatus::Open => "open",
            PositionStatus::Selling => "selling",
            PositionStatus::Closed => "closed",
            PositionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Closed | PositionStatus::Error)
    }

    /// Active positions are tracked in the per-bot active index.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub bot_id: u64,
    pub pair: String,
    pub status: PositionStatus,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    /// Highest/lowest price seen while the position was open. Trailing-stop
    /// evaluation happens in the strategy layer; the watermarks live here.
    pub high_price: f64,
    pub low_price: f64,
    pub profit: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(bot_id: u64, pair: &str) -> Self {
        let now = Utc::now();
        Position {
            id: 0,
            bot_id,
            pair: pair.to_string(),
            status: PositionStatus::Pending,
            entry_price: 0.0,
            exit_price: None,
            quantity: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            profit: 0.0,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Fold a traded price into the high/low watermarks.
    pub fn record_price(&mut self, price: f64) {
        if price > self.high_price {
            self.high_price = price;
        }
        if self.low_price == 0.0 || price < self.low_price {
            self.low_price = price;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_position_starts_pending() {
        let pos = Position::new(4, "ethidr");
        assert_eq!(pos.status, PositionStatus::Pending);
        assert!(pos.status.is_active());
        assert_eq!(pos.bot_id, 4);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PositionStatus::Closed.is_terminal());
        assert!(PositionStatus::Error.is_terminal());
        assert!(!PositionStatus::Selling.is_terminal());
        assert!(!PositionStatus::Closed.is_active());
    }

    #[test]
    fn test_record_price_watermarks() {
        let mut pos = Position::new(1, "btcidr");
        pos.record_price(100.0);
        assert_eq!(pos.high_price, 100.0);
        assert_eq!(pos.low_price, 100.0);
        pos.record_price(120.0);
        pos.record_price(90.0);
        assert_eq!(pos.high_price, 120.0);
        assert_eq!(pos.low_price, 90.0);
    }
}
