use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::models::*;
use super::Store;

/// In-memory `Store` with the same semantics as the SQLite implementation.
///
/// Used by engine tests; nothing here survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    positions: HashMap<i64, Position>,
    account: Option<AccountState>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_position(&self, pos: &Position) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored = pos.clone();
        stored.id = Some(id);
        inner.positions.insert(id, stored);
        Ok(id)
    }

    fn update_risk_state(&self, pos: &Position) -> Result<()> {
        let Some(id) = pos.id else {
            anyhow::bail!("cannot update risk state of an unsaved position");
        };
        let mut inner = self.inner.lock().unwrap();
        if let Some(stored) = inner.positions.get_mut(&id) {
            if stored.status == PositionStatus::Open {
                stored.stop_loss_price = pos.stop_loss_price;
                stored.highest_price_seen = pos.highest_price_seen;
                stored.breakeven_armed = pos.breakeven_armed;
                stored.trailing_active = pos.trailing_active;
            }
        }
        Ok(())
    }

    fn close_position(
        &self,
        id: i64,
        exit_price: f64,
        reason: CloseReason,
        realized_pnl: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.positions.get_mut(&id) {
            Some(pos) if pos.status == PositionStatus::Open => {
                pos.status = PositionStatus::Closed;
                pos.exit_price = Some(exit_price);
                pos.close_reason = Some(reason);
                pos.realized_pnl = Some(realized_pnl);
                pos.closed_at = Some(closed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // One lock over all three writes gives the same all-or-nothing
    // behavior as the SQLite transaction.
    fn commit_open(
        &self,
        pos: &Position,
        account: &AccountState,
        cooldown_at: DateTime<Utc>,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored = pos.clone();
        stored.id = Some(id);
        inner.positions.insert(id, stored);
        inner.account = Some(account.clone());
        inner.cooldowns.insert(pos.market_id.clone(), cooldown_at);
        Ok(id)
    }

    fn commit_close(
        &self,
        id: i64,
        market_id: &str,
        exit_price: f64,
        reason: CloseReason,
        realized_pnl: f64,
        closed_at: DateTime<Utc>,
        account: &AccountState,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.positions.get_mut(&id) {
            Some(pos) if pos.status == PositionStatus::Open => {
                pos.status = PositionStatus::Closed;
                pos.exit_price = Some(exit_price);
                pos.close_reason = Some(reason);
                pos.realized_pnl = Some(realized_pnl);
                pos.closed_at = Some(closed_at);
            }
            _ => return Ok(false),
        }
        inner.account = Some(account.clone());
        inner.cooldowns.insert(market_id.to_string(), closed_at);
        Ok(true)
    }

    fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.positions.get(&id).cloned())
    }

    fn list_open_positions(&self) -> Result<Vec<Position>> {
        let inner = self.inner.lock().unwrap();
        let mut open: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect();
        open.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        Ok(open)
    }

    fn list_closed_positions(&self, limit: i64) -> Result<Vec<Position>> {
        let inner = self.inner.lock().unwrap();
        let mut closed: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Closed)
            .cloned()
            .collect();
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        closed.truncate(limit.max(0) as usize);
        Ok(closed)
    }

    fn load_account(&self) -> Result<Option<AccountState>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.account.clone())
    }

    fn save_account(&self, state: &AccountState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.account = Some(state.clone());
        Ok(())
    }

    fn load_cooldowns(&self) -> Result<Vec<CooldownEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .cooldowns
            .iter()
            .map(|(market_id, last_trade_at)| CooldownEntry {
                market_id: market_id.clone(),
                last_trade_at: *last_trade_at,
            })
            .collect())
    }

    fn upsert_cooldown(&self, market_id: &str, last_trade_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.cooldowns.insert(market_id.to_string(), last_trade_at);
        Ok(())
    }
}
