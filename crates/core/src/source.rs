//! Canonical identifiers for the external market-data sources.
//!
//! Every persisted row that references a source uses the names defined here,
//! so checkpoint keys, raw-table routing, and metric labels stay consistent
//! across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The external sources the pipeline ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Bulk market listings from the CoinGecko `/coins/markets` endpoint.
    CoingeckoMarkets,
    /// Per-coin tickers from CoinPaprika (`/coins` then `/tickers/{id}`).
    CoinpaprikaTickers,
    /// Static CSV market-data feed fetched over HTTP.
    CsvMarketData,
}

impl SourceKind {
    /// All sources, in the order the transform stage processes them.
    pub const ALL: [SourceKind; 3] = [
        SourceKind::CoinpaprikaTickers,
        SourceKind::CoingeckoMarkets,
        SourceKind::CsvMarketData,
    ];

    /// Checkpoint key and metric label for this source.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CoingeckoMarkets => "coingecko_markets",
            Self::CoinpaprikaTickers => "coinpaprika_tickers",
            Self::CsvMarketData => "csv_market_data",
        }
    }

    /// Short label used in normalized rows (`asset_sources`, `asset_market_data`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::CoingeckoMarkets => "coingecko",
            Self::CoinpaprikaTickers => "coinpaprika",
            Self::CsvMarketData => "csv",
        }
    }

    /// Raw-record table this source ingests into.
    #[must_use]
    pub fn raw_table(self) -> &'static str {
        match self {
            Self::CoingeckoMarkets => "raw_coingecko",
            Self::CoinpaprikaTickers => "raw_coinpaprika",
            Self::CsvMarketData => "raw_csv",
        }
    }

    /// Default trigger label recorded on runs started for this source.
    #[must_use]
    pub fn default_trigger(self) -> TriggeredBy {
        match self {
            Self::CoingeckoMarkets | Self::CoinpaprikaTickers => TriggeredBy::Cron,
            Self::CsvMarketData => TriggeredBy::Manual,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coingecko_markets" | "coingecko" => Ok(Self::CoingeckoMarkets),
            "coinpaprika_tickers" | "coinpaprika" => Ok(Self::CoinpaprikaTickers),
            "csv_market_data" | "csv" => Ok(Self::CsvMarketData),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    Cron,
    Retry,
}

impl TriggeredBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cron => "cron",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names_are_stable() {
        assert_eq!(SourceKind::CoingeckoMarkets.name(), "coingecko_markets");
        assert_eq!(SourceKind::CoinpaprikaTickers.name(), "coinpaprika_tickers");
        assert_eq!(SourceKind::CsvMarketData.name(), "csv_market_data");
    }

    #[test]
    fn test_raw_table_routing() {
        assert_eq!(SourceKind::CoingeckoMarkets.raw_table(), "raw_coingecko");
        assert_eq!(SourceKind::CoinpaprikaTickers.raw_table(), "raw_coinpaprika");
        assert_eq!(SourceKind::CsvMarketData.raw_table(), "raw_csv");
    }

    #[test]
    fn test_parse_accepts_short_and_long_names() {
        assert_eq!(
            "coingecko".parse::<SourceKind>().unwrap(),
            SourceKind::CoingeckoMarkets
        );
        assert_eq!(
            "coinpaprika_tickers".parse::<SourceKind>().unwrap(),
            SourceKind::CoinpaprikaTickers
        );
        assert!("kraken".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_default_triggers() {
        assert_eq!(
            SourceKind::CoingeckoMarkets.default_trigger(),
            TriggeredBy::Cron
        );
        assert_eq!(
            SourceKind::CsvMarketData.default_trigger(),
            TriggeredBy::Manual
        );
    }
}
