//! Static CSV market-data feed fetched over HTTP.
//!
//! Each row becomes a JSON object keyed by the header names, so the raw
//! store holds the same shape for every source. The `Date` column supplies
//! the logical timestamp and `Symbol` the external id.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use super::{MarketSource, RawItem};
use crate::fetcher::RateLimitedFetcher;
use marketflow_core::{SourceKind, SourceSettings};

pub struct CsvFeedSource {
    url: String,
}

impl CsvFeedSource {
    #[must_use]
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            url: settings.url.clone(),
        }
    }

    /// Parses the CSV body into raw items, one per row.
    fn parse_body(body: &str) -> Result<Vec<RawItem>> {
        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let headers = reader.headers()?.clone();

        let mut items = Vec::new();
        for record in reader.records() {
            let record = record?;

            let mut payload = Map::with_capacity(headers.len());
            for (header, field) in headers.iter().zip(record.iter()) {
                payload.insert(header.to_string(), JsonValue::String(field.to_string()));
            }
            let payload = JsonValue::Object(payload);

            let source_id = payload
                .get("Symbol")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| anyhow!("csv row missing Symbol column"))?
                .to_string();

            let date = payload
                .get("Date")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| anyhow!("csv row missing Date column"))?;
            let observed_at = parse_feed_timestamp(date)?;

            items.push(RawItem {
                source_id,
                observed_at,
                payload,
            });
        }

        Ok(items)
    }
}

#[async_trait]
impl MarketSource for CsvFeedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CsvMarketData
    }

    async fn fetch(&self, fetcher: &RateLimitedFetcher) -> Result<Vec<RawItem>> {
        let body = fetcher.get_text(&self.url, &[]).await?;
        let items = Self::parse_body(&body)?;
        tracing::debug!(count = items.len(), "parsed csv feed");
        Ok(items)
    }
}

/// Parses the feed's `Date` column: RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a
/// bare `YYYY-MM-DD`, all taken as UTC.
pub fn parse_feed_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid date {raw:?}"))?
            .and_utc());
    }
    Err(anyhow!("unrecognized timestamp {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "\
Date,Symbol,Name,Close,Volume,Marketcap
2021-07-06 23:59:59,BTC,Bitcoin,34235.19,26501259870.5,641899577120.0
2021-07-06 23:59:59,ETH,Ethereum,2323.2,21281169767.4,270966366695.9
";

    #[test]
    fn test_parse_body_builds_json_rows() {
        let items = CsvFeedSource::parse_body(BODY).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_id, "BTC");
        assert_eq!(items[0].payload["Close"], "34235.19");
        assert_eq!(items[1].payload["Name"], "Ethereum");
    }

    #[test]
    fn test_parse_body_missing_symbol_fails() {
        let body = "Date,Name\n2021-07-06,Bitcoin\n";
        assert!(CsvFeedSource::parse_body(body).is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_feed_timestamp("2021-07-06T23:59:59Z").is_ok());
        assert!(parse_feed_timestamp("2021-07-06 23:59:59").is_ok());
        let midnight = parse_feed_timestamp("2021-07-06").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2021-07-06T00:00:00+00:00");
        assert!(parse_feed_timestamp("July 6th").is_err());
    }
}
