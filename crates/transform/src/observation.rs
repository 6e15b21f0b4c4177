//! Per-source payload mapping into a validated market observation.
//!
//! Each source stores a differently shaped raw blob; the parsers here are
//! the only place those shapes are known. Downstream code sees one
//! `MarketObservation`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use thiserror::Error;

use marketflow_core::SourceKind;

/// Why a raw record could not be turned into a market-data point.
///
/// All variants are per-record outcomes: recorded in the failure audit log
/// and skipped, never propagated past the record boundary.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("field {field} is not a number: {value}")]
    BadNumber {
        field: &'static str,
        value: String,
    },

    #[error("bad timestamp in {field}: {value}")]
    BadTimestamp {
        field: &'static str,
        value: String,
    },

    #[error("price_usd must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("market_cap_usd must be non-negative, got {0}")]
    NegativeMarketCap(Decimal),

    #[error("volume_24h_usd must be non-negative, got {0}")]
    NegativeVolume(Decimal),
}

impl TransformError {
    /// Coarse error class stored on the transform-failure row.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MissingField(_) | Self::BadNumber { .. } | Self::BadTimestamp { .. } => {
                "parse_error"
            }
            Self::NonPositivePrice(_) | Self::NegativeMarketCap(_) | Self::NegativeVolume(_) => {
                "validation_error"
            }
        }
    }
}

/// One normalized market observation extracted from a raw payload.
#[derive(Debug, Clone)]
pub struct MarketObservation {
    /// External id under which the source reported this asset.
    pub source_asset_id: String,
    /// Upper-cased ticker symbol.
    pub symbol: String,
    pub name: String,
    pub price_usd: Decimal,
    pub market_cap_usd: Option<Decimal>,
    pub volume_24h_usd: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl MarketObservation {
    /// Checks the value constraints: positive price, non-negative optional
    /// market cap and volume.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.price_usd <= Decimal::ZERO {
            return Err(TransformError::NonPositivePrice(self.price_usd));
        }
        if let Some(market_cap) = self.market_cap_usd {
            if market_cap < Decimal::ZERO {
                return Err(TransformError::NegativeMarketCap(market_cap));
            }
        }
        if let Some(volume) = self.volume_24h_usd {
            if volume < Decimal::ZERO {
                return Err(TransformError::NegativeVolume(volume));
            }
        }
        Ok(())
    }
}

/// Maps a raw payload from the given source into an observation.
///
/// # Errors
/// Returns a `TransformError` describing the first field that could not be
/// extracted.
pub fn parse_observation(
    source: SourceKind,
    payload: &JsonValue,
) -> Result<MarketObservation, TransformError> {
    match source {
        SourceKind::CoingeckoMarkets => parse_coingecko(payload),
        SourceKind::CoinpaprikaTickers => parse_coinpaprika(payload),
        SourceKind::CsvMarketData => parse_csv(payload),
    }
}

fn parse_coingecko(payload: &JsonValue) -> Result<MarketObservation, TransformError> {
    Ok(MarketObservation {
        source_asset_id: required_str(payload, "id")?,
        symbol: required_str(payload, "symbol")?.to_uppercase(),
        name: required_str(payload, "name")?,
        price_usd: required_decimal(&payload["current_price"], "current_price")?,
        market_cap_usd: optional_decimal(&payload["market_cap"], "market_cap")?,
        volume_24h_usd: optional_decimal(&payload["total_volume"], "total_volume")?,
        last_updated: required_timestamp(payload, "last_updated")?,
    })
}

fn parse_coinpaprika(payload: &JsonValue) -> Result<MarketObservation, TransformError> {
    let quotes = &payload["quotes"]["USD"];
    if quotes.is_null() {
        return Err(TransformError::MissingField("quotes.USD"));
    }

    Ok(MarketObservation {
        source_asset_id: required_str(payload, "id")?,
        symbol: required_str(payload, "symbol")?.to_uppercase(),
        name: required_str(payload, "name")?,
        price_usd: required_decimal(&quotes["price"], "quotes.USD.price")?,
        market_cap_usd: optional_decimal(&quotes["market_cap"], "quotes.USD.market_cap")?,
        volume_24h_usd: optional_decimal(&quotes["volume_24h"], "quotes.USD.volume_24h")?,
        last_updated: required_timestamp(payload, "last_updated")?,
    })
}

fn parse_csv(payload: &JsonValue) -> Result<MarketObservation, TransformError> {
    let symbol = required_str(payload, "Symbol")?;
    Ok(MarketObservation {
        source_asset_id: symbol.clone(),
        symbol: symbol.to_uppercase(),
        name: required_str(payload, "Name")?,
        price_usd: required_decimal(&payload["Close"], "Close")?,
        market_cap_usd: optional_decimal(&payload["Marketcap"], "Marketcap")?,
        volume_24h_usd: optional_decimal(&payload["Volume"], "Volume")?,
        last_updated: required_timestamp(payload, "Date")?,
    })
}

fn required_str(payload: &JsonValue, field: &'static str) -> Result<String, TransformError> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or(TransformError::MissingField(field))
}

fn required_decimal(value: &JsonValue, field: &'static str) -> Result<Decimal, TransformError> {
    optional_decimal(value, field)?.ok_or(TransformError::MissingField(field))
}

/// Null or absent is `None`; a present value that is not numeric is an
/// error.
fn optional_decimal(
    value: &JsonValue,
    field: &'static str,
) -> Result<Option<Decimal>, TransformError> {
    let text = match value {
        JsonValue::Null => return Ok(None),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) if s.is_empty() => return Ok(None),
        JsonValue::String(s) => s.clone(),
        other => {
            return Err(TransformError::BadNumber {
                field,
                value: other.to_string(),
            })
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Some)
        .map_err(|_| TransformError::BadNumber { field, value: text })
}

fn required_timestamp(
    payload: &JsonValue,
    field: &'static str,
) -> Result<DateTime<Utc>, TransformError> {
    let raw = payload
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or(TransformError::MissingField(field))?;

    parse_timestamp(raw).ok_or_else(|| TransformError::BadTimestamp {
        field,
        value: raw.to_string(),
    })
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, or bare `YYYY-MM-DD`, all taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_coingecko_payload() {
        let payload = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 64000.5,
            "market_cap": 1_250_000_000_000u64,
            "total_volume": 32_000_000_000u64,
            "last_updated": "2024-03-14T12:39:27.303Z"
        });

        let obs = parse_observation(SourceKind::CoingeckoMarkets, &payload).unwrap();
        assert_eq!(obs.source_asset_id, "bitcoin");
        assert_eq!(obs.symbol, "BTC");
        assert_eq!(obs.price_usd, dec!(64000.5));
        assert_eq!(obs.market_cap_usd, Some(dec!(1250000000000)));
        assert!(obs.validate().is_ok());
    }

    #[test]
    fn test_parse_coinpaprika_payload() {
        let payload = json!({
            "id": "btc-bitcoin",
            "symbol": "BTC",
            "name": "Bitcoin",
            "quotes": {"USD": {"price": 64000.5, "market_cap": 1.25e12, "volume_24h": 3.2e10}},
            "last_updated": "2024-03-14T12:40:00Z"
        });

        let obs = parse_observation(SourceKind::CoinpaprikaTickers, &payload).unwrap();
        assert_eq!(obs.source_asset_id, "btc-bitcoin");
        assert_eq!(obs.price_usd, dec!(64000.5));
        assert_eq!(obs.volume_24h_usd, Some(dec!(32000000000)));
    }

    #[test]
    fn test_parse_coinpaprika_without_usd_quotes() {
        let payload = json!({"id": "btc-bitcoin", "symbol": "BTC", "name": "Bitcoin"});
        let err = parse_observation(SourceKind::CoinpaprikaTickers, &payload).unwrap_err();
        assert_eq!(err.error_type(), "parse_error");
    }

    #[test]
    fn test_parse_csv_payload_with_string_numbers() {
        let payload = json!({
            "Symbol": "eth",
            "Name": "Ethereum",
            "Close": "2323.2",
            "Marketcap": "270966366695.9",
            "Volume": "21281169767.4",
            "Date": "2021-07-06 23:59:59"
        });

        let obs = parse_observation(SourceKind::CsvMarketData, &payload).unwrap();
        assert_eq!(obs.symbol, "ETH");
        assert_eq!(obs.source_asset_id, "eth");
        assert_eq!(obs.price_usd, dec!(2323.2));
    }

    #[test]
    fn test_missing_optional_fields_are_none() {
        let payload = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 100,
            "market_cap": null,
            "total_volume": null,
            "last_updated": "2024-03-14T12:39:27Z"
        });

        let obs = parse_observation(SourceKind::CoingeckoMarkets, &payload).unwrap();
        assert_eq!(obs.market_cap_usd, None);
        assert_eq!(obs.volume_24h_usd, None);
        assert!(obs.validate().is_ok());
    }

    #[test]
    fn test_zero_price_fails_validation() {
        let payload = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 0,
            "last_updated": "2024-03-14T12:39:27Z"
        });

        let obs = parse_observation(SourceKind::CoingeckoMarkets, &payload).unwrap();
        let err = obs.validate().unwrap_err();
        assert!(matches!(err, TransformError::NonPositivePrice(_)));
        assert_eq!(err.error_type(), "validation_error");
    }

    #[test]
    fn test_zero_market_cap_is_allowed() {
        let payload = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 100,
            "market_cap": 0,
            "last_updated": "2024-03-14T12:39:27Z"
        });

        let obs = parse_observation(SourceKind::CoingeckoMarkets, &payload).unwrap();
        assert!(obs.validate().is_ok());
    }

    #[test]
    fn test_negative_volume_fails_validation() {
        let obs = MarketObservation {
            source_asset_id: "x".to_string(),
            symbol: "X".to_string(),
            name: "X Coin".to_string(),
            price_usd: dec!(10),
            market_cap_usd: None,
            volume_24h_usd: Some(dec!(-1)),
            last_updated: Utc::now(),
        };
        assert!(matches!(
            obs.validate().unwrap_err(),
            TransformError::NegativeVolume(_)
        ));
    }

    #[test]
    fn test_garbage_price_is_parse_error() {
        let payload = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": "n/a",
            "last_updated": "2024-03-14T12:39:27Z"
        });

        let err = parse_observation(SourceKind::CoingeckoMarkets, &payload).unwrap_err();
        assert!(matches!(err, TransformError::BadNumber { .. }));
    }
}
