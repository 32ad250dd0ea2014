use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which outcome token a position holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "YES" => Some(Side::Yes),
            "NO" => Some(Side::No),
            _ => None,
        }
    }

    /// Convert a market YES price into the price of this side's token.
    pub fn side_price(&self, yes_price: f64) -> f64 {
        match self {
            Side::Yes => yes_price,
            Side::No => 1.0 - yes_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<PositionStatus> {
        match s {
            "open" => Some(PositionStatus::Open),
            "closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    BreakevenStop,
    TrailingStop,
    Manual,
    MarketResolved,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::BreakevenStop => "BREAKEVEN_STOP",
            CloseReason::TrailingStop => "TRAILING_STOP",
            CloseReason::Manual => "MANUAL",
            CloseReason::MarketResolved => "MARKET_RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Option<CloseReason> {
        match s {
            "STOP_LOSS" => Some(CloseReason::StopLoss),
            "TAKE_PROFIT" => Some(CloseReason::TakeProfit),
            "BREAKEVEN_STOP" => Some(CloseReason::BreakevenStop),
            "TRAILING_STOP" => Some(CloseReason::TrailingStop),
            "MANUAL" => Some(CloseReason::Manual),
            "MARKET_RESOLVED" => Some(CloseReason::MarketResolved),
            _ => None,
        }
    }
}

/// An open or closed trading position.
///
/// Prices are in the held side's token space: for a NO position,
/// `entry_price` and every risk level refer to the NO token price
/// (1 − YES price). `entry_price`, `side`, and `opened_at` are immutable
/// after creation; once status is `Closed` the whole record is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Option<i64>,
    /// Polymarket market condition ID
    pub market_id: String,
    pub side: Side,
    /// USD amount committed
    pub size_usd: f64,
    /// Dollar amount at risk (equity × risk_per_trade_pct at open time)
    pub risk_amount_usd: f64,
    /// Side-token price at which we entered (0.0–1.0)
    pub entry_price: f64,
    /// Side-token price at which we trigger stop-loss exit
    pub stop_loss_price: f64,
    /// Side-token price at which we trigger take-profit exit
    pub take_profit_price: f64,
    /// Highest side-token price observed since open (trailing stop anchor)
    pub highest_price_seen: f64,
    /// Stop has been raised to breakeven
    pub breakeven_armed: bool,
    /// Trailing-stop ratchet is live (armed + trailing enabled)
    pub trailing_active: bool,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub realized_pnl: Option<f64>,
    /// Whether this position was placed in paper mode
    pub paper: bool,
    /// Headline of the triggering event, for logging/alerts
    pub headline: Option<String>,
}

impl Position {
    /// Unrealized gain as a fraction of entry, at side-token price `p`.
    pub fn gain_pct(&self, p: f64) -> f64 {
        (p - self.entry_price) / self.entry_price
    }

    /// Realized P&L if exited at side-token price `p`:
    /// shares = size / entry, pnl = shares × (p − entry).
    pub fn pnl_at(&self, p: f64) -> f64 {
        (p - self.entry_price) * self.size_usd / self.entry_price
    }
}

/// Single-row account snapshot: the only shared mutable balance state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub cash_balance: f64,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    /// Start of the UTC day `daily_pnl` accumulates over.
    pub daily_reset_at: DateTime<Utc>,
}

/// Per-market last-trade timestamp, used by the cooldown gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub market_id: String,
    pub last_trade_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn sample_position(side: Side, entry: f64) -> Position {
        Position {
            id: Some(1),
            market_id: "mkt1".into(),
            side,
            size_usd: 1000.0,
            risk_amount_usd: 200.0,
            entry_price: entry,
            stop_loss_price: entry * 0.85,
            take_profit_price: (entry * 1.30).min(0.99),
            highest_price_seen: entry,
            breakeven_armed: false,
            trailing_active: false,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_price: None,
            close_reason: None,
            realized_pnl: None,
            paper: true,
            headline: None,
        }
    }

    #[test]
    fn test_side_price_conversion() {
        assert_relative_eq!(Side::Yes.side_price(0.47), 0.47, epsilon = 1e-12);
        assert_relative_eq!(Side::No.side_price(0.47), 0.53, epsilon = 1e-12);
    }

    #[test]
    fn test_pnl_at_exit() {
        let pos = sample_position(Side::Yes, 0.50);
        // 2000 shares, price up 0.10 → $200
        assert_relative_eq!(pos.pnl_at(0.60), 200.0, epsilon = 1e-9);
        assert_relative_eq!(pos.pnl_at(0.40), -200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_close_reason_round_trip() {
        for reason in [
            CloseReason::StopLoss,
            CloseReason::TakeProfit,
            CloseReason::BreakevenStop,
            CloseReason::TrailingStop,
            CloseReason::Manual,
            CloseReason::MarketResolved,
        ] {
            assert_eq!(CloseReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(CloseReason::parse("bogus"), None);
    }
}
