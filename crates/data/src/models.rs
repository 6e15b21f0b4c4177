//! Row types for the pipeline's persisted state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Per-source checkpoint: watermark plus last run outcome.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkpoint {
    /// Source key, e.g. "coingecko_markets"
    pub source: String,
    /// High-water mark: logical timestamp of the newest processed record.
    /// Only ever advances; a failed run leaves it untouched.
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Run id of the most recent successful run
    pub last_success_run_id: Option<Uuid>,
    /// When the most recent failure happened, if the last run failed
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Error text of the most recent failure
    pub last_failure_error: Option<String>,
    /// "idle" | "running" | "success" | "failed"
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Returns true if the last run for this source failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == CheckpointStatus::Failed.as_str()
    }
}

/// Checkpoint lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
    Idle,
    Running,
    Success,
    Failed,
}

impl CheckpointStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One execution attempt of ingestion for one source. Append-only; a run
/// transitions exactly once from "running" to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i32>,
    /// "running" | "success" | "failed"
    pub status: String,
    pub records_processed: Option<i32>,
    pub error_message: Option<String>,
    /// "manual" | "cron" | "retry"
    pub triggered_by: Option<String>,
}

/// Run lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// An unmodified captured payload from an external source.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawRecord {
    pub id: Uuid,
    /// External identifier, e.g. the coin id or CSV symbol
    pub source_id: String,
    pub payload: JsonValue,
    /// SHA-256 over the canonicalized payload
    pub payload_hash: String,
    pub ingested_at: DateTime<Utc>,
}

/// A normalized asset, deduplicated across sources.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub asset_id: Uuid,
    pub symbol: String,
    pub name: String,
}

/// A normalized market-data row joined with its asset, as served by the
/// reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketDataRow {
    pub asset_id: Uuid,
    pub symbol: String,
    pub name: String,
    pub source: String,
    pub price_usd: Option<Decimal>,
    pub market_cap_usd: Option<Decimal>,
    pub volume_24h_usd: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_checkpoint_failed_state() {
        let cp = Checkpoint {
            source: "coingecko_markets".to_string(),
            last_processed_at: None,
            last_success_run_id: None,
            last_failure_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            last_failure_error: Some("boom".to_string()),
            status: "failed".to_string(),
            updated_at: Utc::now(),
        };
        assert!(cp.is_failed());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(CheckpointStatus::Idle.as_str(), "idle");
        assert_eq!(RunStatus::Running.as_str(), "running");
        assert_eq!(RunStatus::Success.as_str(), "success");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_run_record_serializes() {
        let record = RunRecord {
            run_id: Uuid::new_v4(),
            source: "csv_market_data".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: "running".to_string(),
            records_processed: None,
            error_message: None,
            triggered_by: Some("manual".to_string()),
        };
        assert!(serde_json::to_string(&record).is_ok());
    }
}
