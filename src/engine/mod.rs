use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::exchange::Exchange;
use crate::store::models::{AccountState, Position};
use crate::store::Store;

pub mod edge;
pub mod executor;
pub mod ledger;
pub mod monitor;
pub mod sizing;

pub use executor::{RejectReason, TradeError};
use ledger::AccountLedger;

/// Risk and gating parameters the engine runs with.
///
/// Extracted from the CLI `Config` so tests can build one directly.
#[derive(Debug, Clone)]
pub struct TradingParams {
    pub min_edge: f64,
    pub min_confidence: f64,
    pub risk_per_trade_pct: f64,
    pub max_position_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub breakeven_trigger_pct: f64,
    pub trailing_stop_pct: f64,
    pub use_trailing_stop: bool,
    pub max_daily_loss_pct: f64,
    pub max_concurrent_positions: usize,
    pub cooldown_secs: u64,
    pub min_trade_usd: f64,
    pub price_timeout_secs: u64,
    pub initial_balance: f64,
    pub paper: bool,
}

/// Mutable engine state guarded by one async lock.
///
/// Holding the lock across an open or close makes those the mutually
/// exclusive critical sections the lifecycle rules require: a market
/// cannot be opened and closed in overlapping steps, and ledger
/// debit/credit is never observed half-applied.
pub(crate) struct EngineState {
    pub(crate) ledger: AccountLedger,
    /// Per-market last-trade timestamps (cooldown registry).
    pub(crate) cooldowns: HashMap<String, DateTime<Utc>>,
}

/// The decision-and-lifecycle core: admits events into positions and
/// supervises them until closure.
pub struct Engine {
    params: TradingParams,
    store: Arc<dyn Store>,
    exchange: Arc<dyn Exchange>,
    state: Mutex<EngineState>,
    closed_tx: broadcast::Sender<Position>,
}

impl Engine {
    /// Build an engine, restoring account state and cooldowns from the
    /// store. First run seeds the account with the configured balance.
    pub fn new(
        params: TradingParams,
        store: Arc<dyn Store>,
        exchange: Arc<dyn Exchange>,
    ) -> Result<Self> {
        let now = Utc::now();
        let ledger = match store.load_account().context("Failed to load account state")? {
            Some(state) => AccountLedger::new(state),
            None => {
                let ledger = AccountLedger::seed(params.initial_balance, now);
                store
                    .save_account(ledger.state())
                    .context("Failed to seed account state")?;
                ledger
            }
        };

        let cooldowns: HashMap<String, DateTime<Utc>> = store
            .load_cooldowns()
            .context("Failed to load cooldowns")?
            .into_iter()
            .map(|c| (c.market_id, c.last_trade_at))
            .collect();
        if !cooldowns.is_empty() {
            tracing::info!("Restored {} market cooldown(s) from storage", cooldowns.len());
        }

        let (closed_tx, _) = broadcast::channel(64);

        Ok(Engine {
            params,
            store,
            exchange,
            state: Mutex::new(EngineState { ledger, cooldowns }),
            closed_tx,
        })
    }

    pub fn params(&self) -> &TradingParams {
        &self.params
    }

    /// Current account snapshot (consistent: taken under the state lock).
    pub async fn account_snapshot(&self) -> AccountState {
        let state = self.state.lock().await;
        state.ledger.state().clone()
    }

    pub fn open_positions(&self) -> Result<Vec<Position>> {
        self.store.list_open_positions()
    }

    pub fn closed_positions(&self, limit: i64) -> Result<Vec<Position>> {
        self.store.list_closed_positions(limit)
    }

    /// Stream of closed positions, for notification fan-out.
    pub fn subscribe_closed(&self) -> broadcast::Receiver<Position> {
        self.closed_tx.subscribe()
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub(crate) async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, EngineState> {
        self.state.lock().await
    }

    pub(crate) fn closed_sender(&self) -> &broadcast::Sender<Position> {
        &self.closed_tx
    }
}
