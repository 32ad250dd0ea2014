use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::Exchange;
use crate::store::models::Side;

/// Client for the Polymarket Gamma (markets) API and CLOB (order) API.
#[derive(Clone)]
pub struct PolymarketClient {
    http: Client,
    api_url: String,
    clob_url: String,
    api_key: Option<String>,
}

impl PolymarketClient {
    pub fn new(api_url: &str, clob_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(PolymarketClient {
            http,
            api_url: api_url.to_string(),
            clob_url: clob_url.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Exchange for PolymarketClient {
    async fn get_price(&self, market_id: &str) -> Result<f64> {
        let url = format!("{}/markets/{}", self.api_url, market_id);
        debug!("Fetching market price: {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch market price")?;

        if !resp.status().is_success() {
            anyhow::bail!("Polymarket price fetch error: {}", resp.status());
        }

        let raw: serde_json::Value = resp.json().await?;
        extract_yes_price(&raw)
    }

    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size_usd: f64,
        limit_price: f64,
    ) -> Result<f64> {
        let api_key = self.api_key.as_deref().unwrap_or_default();

        info!(
            "Placing order: market={}, side={}, size=${:.2}, limit={:.3}",
            market_id,
            side.as_str(),
            size_usd,
            limit_price
        );

        let order = serde_json::json!({
            "market": market_id,
            "outcome": side.as_str(),
            "price": limit_price,
            "size": size_usd,
            "side": "buy",
            "orderType": "limit",
        });

        let url = format!("{}/order", self.clob_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&order)
            .send()
            .await
            .context("Failed to place Polymarket order")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Order placement failed {}: {}", status, body);
        }

        let result: serde_json::Value = resp.json().await?;
        // Fill price when the CLOB reports one; otherwise the limit filled as-is.
        let fill = result["avgPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| result["avgPrice"].as_f64())
            .unwrap_or(limit_price);
        let order_id = result["orderId"].as_str().unwrap_or("unknown");
        info!("Order placed, id={}, fill={:.3}", order_id, fill);
        Ok(fill)
    }
}

/// Pull the YES price out of a Gamma market object.
///
/// Gamma sometimes returns `outcomePrices` as a JSON-encoded string
/// (`"[\"0.45\", \"0.55\"]"`), sometimes as a real array.
fn extract_yes_price(raw: &serde_json::Value) -> Result<f64> {
    let prices = &raw["outcomePrices"];
    let first = if let Some(s) = prices.as_str() {
        let parsed: Vec<String> =
            serde_json::from_str(s).context("Malformed outcomePrices string")?;
        parsed
            .first()
            .and_then(|p| p.parse::<f64>().ok())
    } else if let Some(arr) = prices.as_array() {
        arr.first().and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
        })
    } else {
        None
    };

    match first {
        Some(p) if (0.0..=1.0).contains(&p) => Ok(p),
        Some(p) => anyhow::bail!("YES price out of range: {}", p),
        None => anyhow::bail!("No outcome prices in market response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_extract_yes_price_from_string_encoding() {
        let raw = serde_json::json!({ "outcomePrices": "[\"0.45\", \"0.55\"]" });
        assert_relative_eq!(extract_yes_price(&raw).unwrap(), 0.45, epsilon = 1e-12);
    }

    #[test]
    fn test_extract_yes_price_from_array() {
        let raw = serde_json::json!({ "outcomePrices": [0.62, 0.38] });
        assert_relative_eq!(extract_yes_price(&raw).unwrap(), 0.62, epsilon = 1e-12);
    }

    #[test]
    fn test_extract_yes_price_rejects_garbage() {
        assert!(extract_yes_price(&serde_json::json!({})).is_err());
        let out_of_range = serde_json::json!({ "outcomePrices": [1.45] });
        assert!(extract_yes_price(&out_of_range).is_err());
    }
}
