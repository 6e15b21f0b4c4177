//! CoinGecko bulk market listings.
//!
//! One paginated-less call to `/coins/markets` returns every listed market
//! with its `last_updated` timestamp; the whole item is kept as the raw
//! payload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{rfc3339_field, str_field, MarketSource, RawItem};
use crate::fetcher::RateLimitedFetcher;
use marketflow_core::{SourceKind, SourceSettings};

pub struct CoingeckoSource {
    base_url: String,
    api_key: Option<String>,
}

impl CoingeckoSource {
    #[must_use]
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    fn parse_item(item: JsonValue) -> Result<RawItem> {
        let source_id = str_field(&item, "id")?;
        let observed_at = rfc3339_field(&item, "last_updated")?;
        Ok(RawItem {
            source_id,
            observed_at,
            payload: item,
        })
    }
}

#[async_trait]
impl MarketSource for CoingeckoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CoingeckoMarkets
    }

    async fn fetch(&self, fetcher: &RateLimitedFetcher) -> Result<Vec<RawItem>> {
        let api_key = self
            .api_key
            .as_deref()
            .context("coingecko api key not configured")?;

        let url = format!("{}/coins/markets", self.base_url);
        let query = [("vs_currency", "usd"), ("x_cg_demo_api_key", api_key)];
        let items: Vec<JsonValue> = fetcher.get_json(&url, &query).await?;

        tracing::debug!(count = items.len(), "fetched coingecko markets");

        items.into_iter().map(Self::parse_item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> SourceSettings {
        SourceSettings {
            url: "https://api.coingecko.com/api/v3/".to_string(),
            api_key: Some("demo-key".to_string()),
            min_interval_secs: 2,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 10_000,
            timeout_secs: 10,
            expects_records: true,
        }
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let source = CoingeckoSource::new(&settings());
        assert_eq!(source.base_url, "https://api.coingecko.com/api/v3");
    }

    #[test]
    fn test_parse_item() {
        let item = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 64000.5,
            "market_cap": 1_250_000_000_000u64,
            "total_volume": 32_000_000_000u64,
            "last_updated": "2024-03-14T12:39:27.303Z"
        });

        let raw = CoingeckoSource::parse_item(item).unwrap();
        assert_eq!(raw.source_id, "bitcoin");
        assert_eq!(raw.payload["symbol"], "btc");
    }

    #[test]
    fn test_parse_item_missing_timestamp() {
        let item = json!({"id": "bitcoin"});
        assert!(CoingeckoSource::parse_item(item).is_err());
    }
}
