//! External source implementations.
//!
//! Each source only decides what to fetch and how to pull an external id and
//! logical timestamp out of the payload; the shared driver in
//! [`crate::ingester`] owns watermark filtering, dedup, and checkpointing.

pub mod coingecko;
pub mod coinpaprika;
pub mod csv_feed;

pub use coingecko::CoingeckoSource;
pub use coinpaprika::CoinpaprikaSource;
pub use csv_feed::CsvFeedSource;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::fetcher::RateLimitedFetcher;
use marketflow_core::{SourceKind, SourceSettings};

/// One fetched item, before watermark filtering and dedup.
#[derive(Debug, Clone)]
pub struct RawItem {
    /// External identifier (coin id, CSV symbol).
    pub source_id: String,
    /// Logical timestamp of the observation, used for the watermark.
    pub observed_at: DateTime<Utc>,
    /// The unmodified payload, persisted as-is.
    pub payload: JsonValue,
}

/// A pollable external market-data source.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Which source this is; determines checkpoint key and raw table.
    fn kind(&self) -> SourceKind;

    /// Pulls the current batch of items from the external source.
    async fn fetch(&self, fetcher: &RateLimitedFetcher) -> Result<Vec<RawItem>>;
}

/// Builds the source implementation for a kind from its settings.
#[must_use]
pub fn make_source(kind: SourceKind, settings: &SourceSettings) -> Box<dyn MarketSource> {
    match kind {
        SourceKind::CoingeckoMarkets => Box::new(CoingeckoSource::new(settings)),
        SourceKind::CoinpaprikaTickers => Box::new(CoinpaprikaSource::new(settings)),
        SourceKind::CsvMarketData => Box::new(CsvFeedSource::new(settings)),
    }
}

/// Parses an RFC 3339 timestamp field out of a payload.
pub(crate) fn rfc3339_field(payload: &JsonValue, field: &str) -> Result<DateTime<Utc>> {
    let raw = payload
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing {field} field"))?;
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("bad {field} timestamp {raw:?}: {e}"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Extracts a required string field from a payload.
pub(crate) fn str_field(payload: &JsonValue, field: &str) -> Result<String> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing {field} field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rfc3339_field_parses_zulu() {
        let payload = json!({"last_updated": "2024-03-14T12:39:27.303Z"});
        let ts = rfc3339_field(&payload, "last_updated").unwrap();
        assert_eq!(ts.timestamp(), 1_710_419_967);
    }

    #[test]
    fn test_rfc3339_field_rejects_missing_and_garbage() {
        assert!(rfc3339_field(&json!({}), "last_updated").is_err());
        assert!(rfc3339_field(&json!({"last_updated": "not a date"}), "last_updated").is_err());
    }

    #[test]
    fn test_str_field() {
        assert_eq!(str_field(&json!({"id": "btc"}), "id").unwrap(), "btc");
        assert!(str_field(&json!({"id": 7}), "id").is_err());
    }
}
