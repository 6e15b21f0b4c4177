//! CoinPaprika tickers.
//!
//! Two-step shape: `/coins` lists ids, then each coin gets its own
//! `/tickers/{id}` sub-fetch. The per-coin ticker is the raw payload; the
//! fetcher's pacing applies to every sub-fetch.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{rfc3339_field, str_field, MarketSource, RawItem};
use crate::fetcher::RateLimitedFetcher;
use marketflow_core::{SourceKind, SourceSettings};

pub struct CoinpaprikaSource {
    base_url: String,
}

impl CoinpaprikaSource {
    #[must_use]
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
        }
    }

    fn parse_ticker(coin_id: String, ticker: JsonValue) -> Result<RawItem> {
        let observed_at = rfc3339_field(&ticker, "last_updated")?;
        Ok(RawItem {
            source_id: coin_id,
            observed_at,
            payload: ticker,
        })
    }

    /// Extracts the coin ids from the `/coins` listing. An entry without an
    /// id is logged and skipped rather than failing the whole source.
    fn coin_ids(coins: Vec<JsonValue>) -> Vec<String> {
        coins
            .into_iter()
            .filter_map(|coin| match str_field(&coin, "id") {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed coin entry");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl MarketSource for CoinpaprikaSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CoinpaprikaTickers
    }

    async fn fetch(&self, fetcher: &RateLimitedFetcher) -> Result<Vec<RawItem>> {
        let coins_url = format!("{}/coins", self.base_url);
        let coins: Vec<JsonValue> = fetcher.get_json(&coins_url, &[]).await?;

        tracing::debug!(count = coins.len(), "fetched coinpaprika coin list");

        let coin_ids = Self::coin_ids(coins);
        let mut items = Vec::with_capacity(coin_ids.len());
        for coin_id in coin_ids {
            let ticker_url = format!("{}/tickers/{coin_id}", self.base_url);
            let ticker: JsonValue = fetcher.get_json(&ticker_url, &[]).await?;
            items.push(Self::parse_ticker(coin_id, ticker)?);
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ticker() {
        let ticker = json!({
            "id": "btc-bitcoin",
            "symbol": "BTC",
            "name": "Bitcoin",
            "quotes": {"USD": {"price": 64000.5, "market_cap": 1.25e12, "volume_24h": 3.2e10}},
            "last_updated": "2024-03-14T12:40:00Z"
        });

        let raw = CoinpaprikaSource::parse_ticker("btc-bitcoin".to_string(), ticker).unwrap();
        assert_eq!(raw.source_id, "btc-bitcoin");
        assert_eq!(raw.payload["quotes"]["USD"]["price"], 64000.5);
    }

    #[test]
    fn test_parse_ticker_without_timestamp_fails() {
        let ticker = json!({"id": "btc-bitcoin"});
        assert!(CoinpaprikaSource::parse_ticker("btc-bitcoin".to_string(), ticker).is_err());
    }

    #[test]
    fn test_malformed_coin_entries_are_skipped() {
        let coins = vec![
            json!({"id": "btc-bitcoin", "symbol": "BTC"}),
            json!({"symbol": "???"}),
            json!({"id": 42}),
            json!({"id": "eth-ethereum", "symbol": "ETH"}),
        ];

        let ids = CoinpaprikaSource::coin_ids(coins);
        assert_eq!(ids, vec!["btc-bitcoin", "eth-ethereum"]);
    }
}
