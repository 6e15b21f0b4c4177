use crate::source::SourceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub coingecko: SourceSettings,
    pub coinpaprika: SourceSettings,
    pub csv: SourceSettings,
}

/// Per-source fetch and anomaly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Base URL for API sources, full file URL for the CSV feed.
    pub url: String,
    /// API key, if the source requires one.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Minimum wall-clock interval between outbound requests.
    pub min_interval_secs: u64,
    /// Retry ceiling for transient fetch failures.
    pub max_retries: u32,
    /// Exponential backoff base, in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff upper bound, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Whether a healthy run is expected to process records. Sources with
    /// `false` are exempt from the record-drop anomaly check.
    #[serde(default = "default_expects_records")]
    pub expects_records: bool,
}

fn default_expects_records() -> bool {
    true
}

impl SourcesConfig {
    /// Settings for a given source.
    #[must_use]
    pub fn for_source(&self, source: SourceKind) -> &SourceSettings {
        match source {
            SourceKind::CoingeckoMarkets => &self.coingecko,
            SourceKind::CoinpaprikaTickers => &self.coinpaprika,
            SourceKind::CsvMarketData => &self.csv,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/marketflow".to_string(),
                max_connections: 10,
            },
            sources: SourcesConfig {
                coingecko: SourceSettings {
                    url: "https://api.coingecko.com/api/v3".to_string(),
                    api_key: None,
                    min_interval_secs: 2,
                    max_retries: 3,
                    backoff_base_ms: 500,
                    backoff_cap_ms: 10_000,
                    timeout_secs: 10,
                    expects_records: true,
                },
                coinpaprika: SourceSettings {
                    url: "https://api.coinpaprika.com/v1".to_string(),
                    api_key: None,
                    min_interval_secs: 60,
                    max_retries: 3,
                    backoff_base_ms: 500,
                    backoff_cap_ms: 10_000,
                    timeout_secs: 10,
                    expects_records: true,
                },
                csv: SourceSettings {
                    url: "https://example.com/data/market_data.csv".to_string(),
                    api_key: None,
                    min_interval_secs: 60,
                    max_retries: 3,
                    backoff_base_ms: 500,
                    backoff_cap_ms: 10_000,
                    timeout_secs: 10,
                    // Static file: record counts drop to zero once ingested.
                    expects_records: false,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_pacing() {
        let config = AppConfig::default();
        assert_eq!(config.sources.coingecko.min_interval_secs, 2);
        assert_eq!(config.sources.coinpaprika.min_interval_secs, 60);
        assert_eq!(config.sources.csv.min_interval_secs, 60);
    }

    #[test]
    fn test_csv_feed_exempt_from_record_drop() {
        let config = AppConfig::default();
        assert!(config.sources.coingecko.expects_records);
        assert!(config.sources.coinpaprika.expects_records);
        assert!(!config.sources.csv.expects_records);
    }

    #[test]
    fn test_for_source_routing() {
        let config = AppConfig::default();
        let settings = config.sources.for_source(SourceKind::CoinpaprikaTickers);
        assert!(settings.url.contains("coinpaprika"));
    }

    #[test]
    fn test_expects_records_defaults_true_when_omitted() {
        let settings: SourceSettings = toml::from_str(
            r#"
            url = "https://example.com"
            min_interval_secs = 1
            max_retries = 3
            backoff_base_ms = 500
            backoff_cap_ms = 10000
            timeout_secs = 10
            "#,
        )
        .unwrap();
        assert!(settings.expects_records);
        assert!(settings.api_key.is_none());
    }
}
