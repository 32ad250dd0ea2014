use chrono::Utc;
use futures_util::future::join_all;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::Engine;
use crate::store::models::{CloseReason, Position, PositionStatus};

impl Engine {
    /// One monitoring sweep: refresh quotes for every open position and
    /// advance each through its risk state machine.
    ///
    /// A sweep never fails as a whole. A market whose quote cannot be
    /// fetched is skipped until the next sweep, and an error evaluating one
    /// position is logged without touching the others.
    pub async fn sweep_positions(&self) {
        // The daily boundary must roll even on quiet days with no
        // positions, or a stale breaker would block the first trade.
        {
            let mut state = self.lock_state().await;
            if state.ledger.roll_daily_if_due(Utc::now()) {
                if let Err(e) = self.store().save_account(state.ledger.state()) {
                    error!("Failed to persist daily reset: {:#}", e);
                }
            }
        }

        let open = match self.store().list_open_positions() {
            Ok(positions) => positions,
            Err(e) => {
                error!("Failed to list open positions: {:#}", e);
                return;
            }
        };
        if open.is_empty() {
            return;
        }
        debug!("Sweeping {} open position(s)", open.len());

        let price_timeout = Duration::from_secs(self.params().price_timeout_secs);
        let quotes = join_all(open.iter().map(|pos| async move {
            match timeout(price_timeout, self.exchange().get_price(&pos.market_id)).await {
                Ok(Ok(price)) => Some(price),
                Ok(Err(e)) => {
                    warn!("Quote failed for {}: {:#}", pos.market_id, e);
                    None
                }
                Err(_) => {
                    warn!(
                        "Quote for {} timed out after {:?}",
                        pos.market_id, price_timeout
                    );
                    None
                }
            }
        }))
        .await;

        for (pos, yes_price) in open.iter().zip(quotes) {
            let Some(yes_price) = yes_price else { continue };
            let Some(id) = pos.id else { continue };
            if let Err(e) = self.evaluate_position(id, yes_price).await {
                error!("Failed to evaluate position {}: {:#}", id, e);
            }
        }
    }

    /// Advance one position given a fresh YES quote. Re-reads the position
    /// under the engine lock so a close that raced the sweep is respected.
    async fn evaluate_position(&self, id: i64, yes_price: f64) -> anyhow::Result<()> {
        let mut state = self.lock_state().await;

        let Some(mut pos) = self.store().get_position(id)? else {
            return Ok(());
        };
        if pos.status != PositionStatus::Open {
            return Ok(());
        }

        let p = pos.side.side_price(yes_price);

        // A quote pinned at 0 or 1 means the market has resolved; the
        // position exits at its terminal value whatever the stops say.
        if yes_price == 0.0 || yes_price == 1.0 {
            self.close_locked(&mut state, &pos, p, CloseReason::MarketResolved)?;
            return Ok(());
        }

        // Triggered exits book at the crossed level, not the observed
        // quote: a price that gaps through the stop still exits at the
        // stop, and a breakeven stop at entry realizes exactly zero.
        if p <= pos.stop_loss_price {
            let reason = stop_reason(&pos);
            self.close_locked(&mut state, &pos, pos.stop_loss_price, reason)?;
            return Ok(());
        }

        if p >= pos.take_profit_price {
            self.close_locked(&mut state, &pos, pos.take_profit_price, CloseReason::TakeProfit)?;
            return Ok(());
        }

        let mut dirty = false;
        if p > pos.highest_price_seen {
            pos.highest_price_seen = p;
            dirty = true;
        }

        if !pos.breakeven_armed && pos.gain_pct(p) >= self.params().breakeven_trigger_pct {
            pos.breakeven_armed = true;
            pos.stop_loss_price = pos.entry_price;
            pos.trailing_active = self.params().use_trailing_stop;
            dirty = true;
            info!(
                "Breakeven armed on {} {}: stop → entry {:.3}{}",
                pos.side.as_str(),
                pos.market_id,
                pos.entry_price,
                if pos.trailing_active { " (trailing on)" } else { "" }
            );
        }

        // Trailing stop ratchet: only ever raises the stop.
        if pos.trailing_active {
            let candidate = pos.highest_price_seen * (1.0 - self.params().trailing_stop_pct);
            if candidate > pos.stop_loss_price {
                debug!(
                    "Trailing stop on {} raised {:.3} → {:.3}",
                    pos.market_id, pos.stop_loss_price, candidate
                );
                pos.stop_loss_price = candidate;
                dirty = true;
            }
        }

        if dirty {
            self.store().update_risk_state(&pos)?;
        }
        Ok(())
    }

    /// Operator-initiated close at the current market price.
    ///
    /// The surface a dashboard or admin tool would call; unlike triggered
    /// exits, the fill books at the live quote. Returns the closed record,
    /// or `None` when the id is unknown or the position already closed.
    pub async fn close_manual(&self, id: i64) -> anyhow::Result<Option<Position>> {
        let mut state = self.lock_state().await;

        let Some(pos) = self.store().get_position(id)? else {
            return Ok(None);
        };
        if pos.status != PositionStatus::Open {
            return Ok(None);
        }

        let yes_price = self.exchange().get_price(&pos.market_id).await?;
        let p = pos.side.side_price(yes_price);
        self.close_locked(&mut state, &pos, p, CloseReason::Manual)?;
        self.store().get_position(id)
    }

    /// Commit a close under the already-held state lock: one atomic store
    /// write (close + account + cooldown), then broadcast.
    ///
    /// The store guard makes the close idempotent, and the in-memory
    /// ledger only moves once the commit succeeds — a failed write leaves
    /// both layers on the pre-close state, to be retried next sweep.
    fn close_locked(
        &self,
        state: &mut super::EngineState,
        pos: &Position,
        exit_price: f64,
        reason: CloseReason,
    ) -> anyhow::Result<()> {
        let Some(id) = pos.id else {
            anyhow::bail!("cannot close unsaved position for {}", pos.market_id);
        };
        let now = Utc::now();
        let realized_pnl = pos.pnl_at(exit_price);

        let mut ledger = state.ledger.clone();
        ledger.credit(pos.size_usd + realized_pnl);
        ledger.apply_realized(realized_pnl);

        if !self.store().commit_close(
            id,
            &pos.market_id,
            exit_price,
            reason,
            realized_pnl,
            now,
            ledger.state(),
        )? {
            debug!("Position {} already closed, skipping", id);
            return Ok(());
        }

        state.ledger = ledger;
        // Closing restarts the market's cooldown window.
        state.cooldowns.insert(pos.market_id.clone(), now);

        info!(
            "CLOSED {} {} @ {:.3} [{}]: P&L ${:+.2}",
            pos.side.as_str(),
            pos.market_id,
            exit_price,
            reason.as_str(),
            realized_pnl
        );

        let mut closed = pos.clone();
        closed.status = PositionStatus::Closed;
        closed.closed_at = Some(now);
        closed.exit_price = Some(exit_price);
        closed.close_reason = Some(reason);
        closed.realized_pnl = Some(realized_pnl);
        // No receivers is fine; the stream is best-effort notification.
        let _ = self.closed_sender().send(closed);

        Ok(())
    }
}

/// Which flavor of stop fired. A stop sitting at entry is a breakeven
/// stop even when trailing is live but has not yet ratcheted above entry;
/// a trailing-raised stop reports as a trailing stop.
fn stop_reason(pos: &Position) -> CloseReason {
    if pos.breakeven_armed && pos.stop_loss_price <= pos.entry_price {
        CloseReason::BreakevenStop
    } else if pos.trailing_active {
        CloseReason::TrailingStop
    } else if pos.breakeven_armed {
        CloseReason::BreakevenStop
    } else {
        CloseReason::StopLoss
    }
}
