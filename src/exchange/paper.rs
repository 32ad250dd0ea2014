use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Exchange;
use crate::store::models::Side;

/// Paper execution: real quotes, simulated fills.
///
/// Quotes are delegated to the wrapped live client so paper positions track
/// real prices; orders fill immediately at the limit price and never reach
/// the exchange. Ledger semantics are identical to live mode.
pub struct PaperExchange {
    quotes: Arc<dyn Exchange>,
}

impl PaperExchange {
    pub fn new(quotes: Arc<dyn Exchange>) -> Self {
        PaperExchange { quotes }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_price(&self, market_id: &str) -> Result<f64> {
        self.quotes.get_price(market_id).await
    }

    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size_usd: f64,
        limit_price: f64,
    ) -> Result<f64> {
        info!(
            "[PAPER] Filled {} {} ${:.2} @ {:.3}",
            side.as_str(),
            market_id,
            size_usd,
            limit_price
        );
        Ok(limit_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct FixedQuote(f64);

    #[async_trait]
    impl Exchange for FixedQuote {
        async fn get_price(&self, _market_id: &str) -> Result<f64> {
            Ok(self.0)
        }

        async fn place_order(
            &self,
            _market_id: &str,
            _side: Side,
            _size_usd: f64,
            _limit_price: f64,
        ) -> Result<f64> {
            anyhow::bail!("live path must not be reached in paper mode")
        }
    }

    #[tokio::test]
    async fn test_paper_fills_at_limit_without_touching_live_path() {
        let paper = PaperExchange::new(Arc::new(FixedQuote(0.45)));
        assert_relative_eq!(paper.get_price("m").await.unwrap(), 0.45, epsilon = 1e-12);
        let fill = paper.place_order("m", Side::Yes, 500.0, 0.47).await.unwrap();
        assert_relative_eq!(fill, 0.47, epsilon = 1e-12);
    }
}
