use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::edge::{compute_edge, EdgeDecision};
use super::sizing::{size_position, SizingError, SizingParams};
use super::Engine;
use crate::event::NewsEvent;
use crate::store::models::{Position, PositionStatus};

/// Named admission-gate failure. Expected, logged, never a generic error;
/// callers map each reason to a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("MAX_CONCURRENT_POSITIONS")]
    MaxConcurrentPositions,
    #[error("DUPLICATE_POSITION")]
    DuplicatePosition,
    #[error("COOLDOWN")]
    Cooldown,
    #[error("DAILY_LOSS_LIMIT")]
    DailyLossLimit,
    #[error("EDGE_BELOW_MINIMUM")]
    EdgeBelowMinimum,
}

/// Everything that can stop an open attempt.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("admission rejected: {0}")]
    Rejected(RejectReason),
    #[error(transparent)]
    Sizing(#[from] SizingError),
    #[error("exchange unavailable: {0}")]
    Exchange(anyhow::Error),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl Engine {
    /// Full event pipeline: refresh the quote, compute the edge decision,
    /// and attempt to open. Expected outcomes (no edge, gate rejection,
    /// sizing failure) are logged and folded into `Ok(None)`; only
    /// external/storage/invariant failures surface as errors.
    pub async fn handle_event(&self, event: &NewsEvent) -> Result<Option<Position>, TradeError> {
        // Prefer a fresh quote over the matcher's observed price; the
        // observed price is the fallback, not a hard dependency.
        let market_price = match crate::exchange::with_retry(
            2,
            std::time::Duration::from_millis(200),
            || self.exchange().get_price(&event.market_id),
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "Quote refresh failed for {}, using observed price {:.3}: {}",
                    event.market_id, event.observed_price, e
                );
                event.observed_price
            }
        };

        let Some(decision) = compute_edge(
            event,
            market_price,
            self.params().min_edge,
            self.params().min_confidence,
        ) else {
            debug!(
                "No actionable edge for {} ({:?} @ {:.3})",
                event.market_id, event.kind, market_price
            );
            return Ok(None);
        };

        info!(
            "Decision: {} {} fair={:.3} price={:.3} edge={:.3} ({})",
            decision.side.as_str(),
            decision.market_id,
            decision.fair_value,
            decision.market_price,
            decision.edge,
            event.headline
        );

        match self.try_open(event, &decision).await {
            Ok(pos) => Ok(Some(pos)),
            Err(TradeError::Rejected(reason)) => {
                info!("Open rejected for {}: {}", event.market_id, reason);
                Ok(None)
            }
            Err(TradeError::Sizing(e)) => {
                info!("Sizing failed for {}: {}", event.market_id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply the admission gates in order and, if all pass, open a
    /// position: place the order, debit cash, persist, stamp the cooldown.
    ///
    /// Runs entirely under the engine state lock (held across order
    /// placement), so two simultaneous opens on one market cannot both
    /// pass the dedup gate, and no close interleaves with the commit.
    pub async fn try_open(
        &self,
        event: &NewsEvent,
        decision: &EdgeDecision,
    ) -> Result<Position, TradeError> {
        let params = self.params().clone();
        let now = Utc::now();
        let mut state = self.lock_state().await;

        if state.ledger.roll_daily_if_due(now) {
            self.store()
                .save_account(state.ledger.state())
                .map_err(TradeError::Storage)?;
        }

        let open = self
            .store()
            .list_open_positions()
            .map_err(TradeError::Storage)?;

        // Gate 1: concurrency cap.
        if open.len() >= params.max_concurrent_positions {
            return Err(TradeError::Rejected(RejectReason::MaxConcurrentPositions));
        }

        // Gate 2: at most one open position per market.
        if open.iter().any(|p| p.market_id == decision.market_id) {
            return Err(TradeError::Rejected(RejectReason::DuplicatePosition));
        }

        // Gate 3: per-market cooldown.
        if let Some(last) = state.cooldowns.get(&decision.market_id) {
            let elapsed = now - *last;
            if elapsed < Duration::seconds(params.cooldown_secs as i64) {
                debug!(
                    "Market {} on cooldown ({}s elapsed)",
                    decision.market_id,
                    elapsed.num_seconds()
                );
                return Err(TradeError::Rejected(RejectReason::Cooldown));
            }
        }

        // Gate 4: daily loss breaker.
        let open_notional: f64 = open.iter().map(|p| p.size_usd).sum();
        let equity = state.ledger.equity(open_notional);
        if state.ledger.daily_pnl() <= -(equity * params.max_daily_loss_pct) {
            return Err(TradeError::Rejected(RejectReason::DailyLossLimit));
        }

        // Gate 5: edge floor.
        if decision.edge <= params.min_edge {
            return Err(TradeError::Rejected(RejectReason::EdgeBelowMinimum));
        }

        let sizing = size_position(
            equity,
            state.ledger.cash_balance(),
            &SizingParams {
                risk_per_trade_pct: params.risk_per_trade_pct,
                stop_loss_pct: params.stop_loss_pct,
                max_position_pct: params.max_position_pct,
                min_trade_usd: params.min_trade_usd,
            },
        )?;

        // Place the order before touching the ledger: a failed placement
        // leaves the account exactly as it was.
        let limit_price = decision.side.side_price(decision.market_price);
        let fill = self
            .exchange()
            .place_order(
                &decision.market_id,
                decision.side,
                sizing.size_usd,
                limit_price,
            )
            .await
            .map_err(TradeError::Exchange)?;

        let stop_loss_price = fill * (1.0 - params.stop_loss_pct);
        let take_profit_price = (fill * (1.0 + params.take_profit_pct)).min(0.99);
        if !(stop_loss_price < fill && fill < take_profit_price) {
            return Err(TradeError::Invariant(format!(
                "risk levels out of order for {}: stop={:.4} entry={:.4} target={:.4}",
                decision.market_id, stop_loss_price, fill, take_profit_price
            )));
        }

        let mut pos = Position {
            id: None,
            market_id: decision.market_id.clone(),
            side: decision.side,
            size_usd: sizing.size_usd,
            risk_amount_usd: sizing.risk_amount_usd,
            entry_price: fill,
            stop_loss_price,
            take_profit_price,
            highest_price_seen: fill,
            breakeven_armed: false,
            trailing_active: false,
            status: PositionStatus::Open,
            opened_at: now,
            closed_at: None,
            exit_price: None,
            close_reason: None,
            realized_pnl: None,
            paper: params.paper,
            headline: (!event.headline.is_empty()).then(|| event.headline.clone()),
        };

        // Cannot fail: the sizer capped at available cash under this lock.
        state.ledger.debit(sizing.size_usd).map_err(|cash| {
            TradeError::Invariant(format!(
                "debit ${:.2} exceeds cash ${:.2}",
                sizing.size_usd, cash
            ))
        })?;

        // Position, debited account, and cooldown stamp land in one store
        // commit; a failed write undoes the in-memory debit as well, so
        // neither layer ends up half-open.
        let id = match self.store().commit_open(&pos, state.ledger.state(), now) {
            Ok(id) => id,
            Err(e) => {
                state.ledger.credit(sizing.size_usd);
                return Err(TradeError::Storage(e));
            }
        };
        pos.id = Some(id);
        state.cooldowns.insert(decision.market_id.clone(), now);

        info!(
            "OPENED {} {} ${:.2} @ {:.3} (SL {:.3} / TP {:.3}, risk ${:.2})",
            pos.side.as_str(),
            pos.market_id,
            pos.size_usd,
            pos.entry_price,
            pos.stop_loss_price,
            pos.take_profit_price,
            pos.risk_amount_usd
        );

        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{params, FlakyStore, StubExchange};
    use crate::event::{EventKind, Polarity};
    use crate::exchange::Exchange;
    use crate::store::{MemoryStore, Store};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn event(market_id: &str, price: f64) -> NewsEvent {
        NewsEvent {
            kind: EventKind::CourtRuling,
            polarity: Polarity::Positive,
            confidence: 0.9,
            market_id: market_id.into(),
            observed_price: price,
            headline: "Supreme Court affirms ruling".into(),
            detected_at: Utc::now(),
        }
    }

    fn engine_with(
        exchange: Arc<StubExchange>,
        store: Arc<MemoryStore>,
    ) -> Engine {
        Engine::new(params(), store, exchange).unwrap()
    }

    #[tokio::test]
    async fn test_open_debits_ledger_and_persists() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.45);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(exchange, Arc::clone(&store));

        let pos = engine
            .handle_event(&event("mkt1", 0.45))
            .await
            .unwrap()
            .expect("trade should open");

        assert_relative_eq!(pos.entry_price, 0.45, epsilon = 1e-12);
        assert_relative_eq!(pos.size_usd, 1_333.3333333333333, epsilon = 1e-6);
        assert_relative_eq!(pos.stop_loss_price, 0.45 * 0.85, epsilon = 1e-12);
        assert_relative_eq!(pos.take_profit_price, 0.45 * 1.30, epsilon = 1e-12);

        let account = engine.account_snapshot().await;
        assert_relative_eq!(
            account.cash_balance,
            10_000.0 - pos.size_usd,
            epsilon = 1e-6
        );
        assert_eq!(store.list_open_positions().unwrap().len(), 1);
        assert_eq!(store.load_cooldowns().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_open_rejected() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.45);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(exchange, store);

        let ev = event("mkt1", 0.45);
        let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
        engine.try_open(&ev, &decision).await.unwrap();

        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(
            err,
            TradeError::Rejected(RejectReason::DuplicatePosition)
        ));
    }

    #[tokio::test]
    async fn test_cooldown_rejected_after_close_regardless_of_edge() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.45);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(exchange, Arc::clone(&store));

        let ev = event("mkt1", 0.45);
        let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
        let pos = engine.try_open(&ev, &decision).await.unwrap();

        // Close it out of band; the cooldown stamp from the open remains.
        store
            .close_position(
                pos.id.unwrap(),
                0.611,
                crate::store::models::CloseReason::TakeProfit,
                100.0,
                Utc::now(),
            )
            .unwrap();

        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(err, TradeError::Rejected(RejectReason::Cooldown)));
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let exchange = Arc::new(StubExchange::new());
        let store = Arc::new(MemoryStore::new());
        let mut p = params();
        p.max_concurrent_positions = 2;
        let engine = Engine::new(p, store, exchange.clone()).unwrap();

        for i in 0..2 {
            let market = format!("mkt{}", i);
            exchange.set_price(&market, 0.45);
            let ev = event(&market, 0.45);
            let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
            engine.try_open(&ev, &decision).await.unwrap();
        }

        exchange.set_price("mkt9", 0.45);
        let ev = event("mkt9", 0.45);
        let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(
            err,
            TradeError::Rejected(RejectReason::MaxConcurrentPositions)
        ));
    }

    #[tokio::test]
    async fn test_daily_loss_breaker_until_reset() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.45);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(exchange, Arc::clone(&store));

        // Force today's P&L to the limit: -10% of $10k equity.
        {
            let mut state = engine.lock_state().await;
            state.ledger.apply_realized(-1_000.0);
        }

        let ev = event("mkt1", 0.45);
        let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(
            err,
            TradeError::Rejected(RejectReason::DailyLossLimit)
        ));

        // Simulate the daily boundary rolling over: attempts pass again.
        {
            let mut state = engine.lock_state().await;
            let tomorrow = Utc::now() + Duration::days(1);
            assert!(state.ledger.roll_daily_if_due(tomorrow));
        }
        assert!(engine.try_open(&ev, &decision).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_order_leaves_account_untouched() {
        let mut exchange = StubExchange::new();
        exchange.set_price("mkt1", 0.45);
        exchange.fail_orders = true;
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::new(exchange), Arc::clone(&store));

        let ev = event("mkt1", 0.45);
        let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(err, TradeError::Exchange(_)));

        let account = engine.account_snapshot().await;
        assert_relative_eq!(account.cash_balance, 10_000.0, epsilon = 1e-12);
        assert!(store.list_open_positions().unwrap().is_empty());
        assert!(store.load_cooldowns().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_debit() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.45);
        let store = Arc::new(FlakyStore::new());
        let engine =
            Engine::new(
                params(),
                Arc::clone(&store) as Arc<dyn Store>,
                Arc::clone(&exchange) as Arc<dyn Exchange>,
            )
            .unwrap();

        store.fail_commits(true);
        let ev = event("mkt1", 0.45);
        let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(err, TradeError::Storage(_)));

        // The debit was undone along with the failed write.
        let account = engine.account_snapshot().await;
        assert_relative_eq!(account.cash_balance, 10_000.0, epsilon = 1e-12);
        assert!(store.list_open_positions().unwrap().is_empty());
        assert!(store.load_cooldowns().unwrap().is_empty());

        // Storage recovers: the same event opens cleanly.
        store.fail_commits(false);
        assert!(engine.try_open(&ev, &decision).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_opens_one_market_exactly_one_succeeds() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.45);
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(engine_with(exchange, Arc::clone(&store)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let ev = event("mkt1", 0.45);
                let decision = compute_edge(&ev, 0.45, 0.05, 0.6).unwrap();
                engine.try_open(&ev, &decision).await.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.list_open_positions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entry_too_close_to_ceiling_is_invariant_violation() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("mkt1", 0.985);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(exchange, store);

        // YES at 0.985: target clips to 0.99... but entry < target still
        // holds; push to where the clip inverts the ordering.
        let ev = NewsEvent {
            kind: EventKind::CourtRuling,
            polarity: Polarity::Negative,
            confidence: 0.9,
            market_id: "mkt1".into(),
            observed_price: 0.985,
            headline: String::new(),
            detected_at: Utc::now(),
        };
        // fair = 0.05 < 0.985 → NO side, NO entry = 1 - 0.985 = 0.015; levels
        // are fine there, so instead force a YES decision near the ceiling.
        let decision = EdgeDecision {
            market_id: "mkt1".into(),
            fair_value: 0.95,
            market_price: 0.992,
            edge: 0.06,
            side: crate::store::models::Side::Yes,
        };
        let err = engine.try_open(&ev, &decision).await.unwrap_err();
        assert!(matches!(err, TradeError::Invariant(_)));
    }
}
