use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod engine;
mod event;
mod exchange;
mod feed;
mod store;

use config::Config;
use engine::Engine;
use exchange::{Exchange, PaperExchange, PolymarketClient};
use store::{SqliteStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    if config.live {
        info!("🔴 LIVE mode – real orders WILL be placed on Polymarket");
    } else {
        info!(
            "🟡 PAPER mode – real quotes, simulated fills (initial balance: ${:.2})",
            config.initial_balance
        );
    }

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database_path)?);
    info!("Database opened: {}", config.database_path);

    let polymarket = Arc::new(PolymarketClient::new(
        &config.polymarket_api_url,
        &config.polymarket_clob_url,
        config.polymarket_api_key.clone(),
    )?);
    let exchange: Arc<dyn Exchange> = if config.live {
        polymarket
    } else {
        Arc::new(PaperExchange::new(polymarket))
    };

    let engine = Arc::new(Engine::new(config.trading_params(), store, exchange)?);

    let account = engine.account_snapshot().await;
    let open = engine.open_positions()?;
    info!(
        "Account restored: cash ${:.2}, total P&L ${:+.2}, {} open position(s)",
        account.cash_balance,
        account.total_pnl,
        open.len()
    );
    for pos in &open {
        info!(
            "  open: {} {} ${:.2} @ {:.3} (SL {:.3} / TP {:.3})",
            pos.side.as_str(),
            pos.market_id,
            pos.size_usd,
            pos.entry_price,
            pos.stop_loss_price,
            pos.take_profit_price
        );
    }

    // Log every closed position as it happens.
    {
        let mut rx = engine.subscribe_closed();
        tokio::spawn(async move {
            while let Ok(pos) = rx.recv().await {
                info!(
                    "Position closed: {} {} [{}] P&L ${:+.2}{}",
                    pos.side.as_str(),
                    pos.market_id,
                    pos.close_reason.map(|r| r.as_str()).unwrap_or("?"),
                    pos.realized_pnl.unwrap_or(0.0),
                    pos.headline
                        .as_deref()
                        .map(|h| format!(" ({})", h))
                        .unwrap_or_default()
                );
            }
        });
    }

    // Hourly account summary.
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                let account = engine.account_snapshot().await;
                let open = engine.open_positions().map(|p| p.len()).unwrap_or(0);
                let closed = engine.closed_positions(10).unwrap_or_default();
                info!(
                    "Status: cash ${:.2}, daily P&L ${:+.2}, total P&L ${:+.2}, {} open, last {} closed",
                    account.cash_balance,
                    account.daily_pnl,
                    account.total_pnl,
                    open,
                    closed.len()
                );
            }
        });
    }

    let mut events = feed::start_event_feed();
    let mut sweep_interval =
        tokio::time::interval(Duration::from_secs(config.monitor_interval_secs));
    info!(
        "Engine started: min edge {:.0}%, sweep every {}s",
        engine.params().min_edge * 100.0,
        config.monitor_interval_secs
    );

    // Main loop: admit events, sweep positions. Both paths serialize on
    // the engine's state lock, so they can share one task.
    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        if let Err(e) = engine.handle_event(&event).await {
                            error!("Error processing event for {}: {:#}", event.market_id, e);
                        }
                    }
                    None => {
                        info!("Event feed closed, monitoring open positions only");
                        break;
                    }
                }
            }
            _ = sweep_interval.tick() => {
                engine.sweep_positions().await;
            }
        }
    }

    // Feed is gone; keep supervising whatever is still open.
    loop {
        sweep_interval.tick().await;
        engine.sweep_positions().await;
    }
}
