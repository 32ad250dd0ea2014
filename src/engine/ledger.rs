use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::store::models::AccountState;

/// The account ledger: cash plus realized P&L counters.
///
/// Only the executor (debit on open) and the monitor (credit on close)
/// mutate it, always under the engine state lock, and every mutation is
/// persisted before the lock is released.
#[derive(Debug, Clone)]
pub struct AccountLedger {
    state: AccountState,
}

impl AccountLedger {
    pub fn new(state: AccountState) -> Self {
        AccountLedger { state }
    }

    /// Fresh ledger seeded with the starting balance.
    pub fn seed(initial_balance: f64, now: DateTime<Utc>) -> Self {
        AccountLedger {
            state: AccountState {
                cash_balance: initial_balance,
                total_pnl: 0.0,
                daily_pnl: 0.0,
                daily_reset_at: day_start_utc(now.date_naive()),
            },
        }
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn cash_balance(&self) -> f64 {
        self.state.cash_balance
    }

    pub fn daily_pnl(&self) -> f64 {
        self.state.daily_pnl
    }

    /// Cash plus committed notional: the equity base for sizing and limits.
    pub fn equity(&self, open_notional: f64) -> f64 {
        self.state.cash_balance + open_notional
    }

    /// Reserve cash for a new position. Refuses to drive the balance
    /// negative; the sizer caps at available cash, so hitting this means a
    /// caller bypassed sizing.
    pub fn debit(&mut self, amount: f64) -> Result<(), f64> {
        if amount > self.state.cash_balance {
            return Err(self.state.cash_balance);
        }
        self.state.cash_balance -= amount;
        Ok(())
    }

    /// Return proceeds of a closed position to cash.
    pub fn credit(&mut self, amount: f64) {
        self.state.cash_balance += amount;
    }

    /// Record realized P&L against both the lifetime and daily counters.
    pub fn apply_realized(&mut self, pnl: f64) {
        self.state.total_pnl += pnl;
        self.state.daily_pnl += pnl;
    }

    /// Reset `daily_pnl` when the UTC day has rolled over since the last
    /// reset. Returns true if a rollover happened (state needs persisting).
    pub fn roll_daily_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let today = day_start_utc(now.date_naive());
        if today > self.state.daily_reset_at {
            info!(
                "Daily P&L reset ({} → {}): was ${:+.2}",
                self.state.daily_reset_at.date_naive(),
                today.date_naive(),
                self.state.daily_pnl
            );
            self.state.daily_pnl = 0.0;
            self.state.daily_reset_at = today;
            true
        } else {
            false
        }
    }
}

fn day_start_utc(day: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(
        day.and_hms_opt(0, 0, 0).expect("valid day start"),
        Utc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    #[test]
    fn test_debit_credit_round_trip() {
        let mut ledger = AccountLedger::seed(10_000.0, Utc::now());
        ledger.debit(1_333.33).unwrap();
        assert_relative_eq!(ledger.cash_balance(), 8_666.67, epsilon = 1e-9);
        ledger.credit(1_333.33 + 400.0);
        ledger.apply_realized(400.0);
        assert_relative_eq!(ledger.cash_balance(), 10_400.0, epsilon = 1e-9);
        assert_relative_eq!(ledger.state().total_pnl, 400.0, epsilon = 1e-9);
        assert_relative_eq!(ledger.daily_pnl(), 400.0, epsilon = 1e-9);
    }

    #[test]
    fn test_overdraft_refused() {
        let mut ledger = AccountLedger::seed(100.0, Utc::now());
        assert!(ledger.debit(100.01).is_err());
        assert_relative_eq!(ledger.cash_balance(), 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_daily_rollover_at_utc_midnight() {
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();
        let mut ledger = AccountLedger::seed(10_000.0, day1);
        ledger.apply_realized(-900.0);
        assert_relative_eq!(ledger.daily_pnl(), -900.0, epsilon = 1e-9);

        // Later the same day: no reset.
        let later = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        assert!(!ledger.roll_daily_if_due(later));
        assert_relative_eq!(ledger.daily_pnl(), -900.0, epsilon = 1e-9);

        // Past midnight: daily resets, lifetime P&L stays.
        let next_day = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 1).unwrap();
        assert!(ledger.roll_daily_if_due(next_day));
        assert_relative_eq!(ledger.daily_pnl(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ledger.state().total_pnl, -900.0, epsilon = 1e-9);

        // Idempotent within the new day.
        assert!(!ledger.roll_daily_if_due(next_day));
    }

    #[test]
    fn test_equity_includes_open_notional() {
        let mut ledger = AccountLedger::seed(10_000.0, Utc::now());
        ledger.debit(2_000.0).unwrap();
        assert_relative_eq!(ledger.equity(2_000.0), 10_000.0, epsilon = 1e-9);
    }
}
