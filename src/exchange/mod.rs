use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::store::models::Side;

pub mod paper;
pub mod polymarket;

pub use paper::PaperExchange;
pub use polymarket::PolymarketClient;

/// Narrow market-data / order-placement interface the engine depends on.
///
/// `get_price` returns the market's YES price; the engine converts to the
/// held side's token price where needed. `place_order` returns the fill
/// price of the chosen side's token. All implementations must bound their
/// calls with a timeout.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Current YES price for a market (0.0–1.0).
    async fn get_price(&self, market_id: &str) -> Result<f64>;

    /// Buy `size_usd` of the given side's outcome token at up to
    /// `limit_price` (side-token space). Returns the fill price.
    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size_usd: f64,
        limit_price: f64,
    ) -> Result<f64>;
}

/// Retry an external call a bounded number of times with jittered backoff.
///
/// Exhausted retries surface the last error; the caller decides whether
/// that skips a tick or aborts an open attempt.
pub async fn with_retry<T, F, Fut>(attempts: u32, base_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("External call failed (attempt {}): {}", attempt + 1, e);
                last_err = Some(e);
            }
        }
        if attempt + 1 < attempts {
            let backoff = base_delay * 2u32.saturating_pow(attempt);
            let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis().max(1) as u64 / 2);
            tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry attempts exhausted")))
}
