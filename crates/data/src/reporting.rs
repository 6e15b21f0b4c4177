//! Read accessors for the reporting layer.
//!
//! Everything here is read-only; the pipeline's persisted state is the only
//! interface between ingestion/transform and the query endpoints.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{Checkpoint, MarketDataRow, RunRecord, RunStatus};
use marketflow_core::{SourceKind, SourcesConfig};

/// How many trailing successful runs feed the anomaly baseline.
const BASELINE_RUNS: i64 = 10;

/// Per-source run summary for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRunStats {
    pub source: String,
    pub last_run: Option<RunRecord>,
    pub success_count: i64,
    pub failure_count: i64,
}

/// Trailing averages over recent successful runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunBaseline {
    pub avg_duration_ms: Option<f64>,
    pub avg_records: Option<f64>,
}

/// Kinds of cross-run anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    RunFailed,
    DurationSpike,
    RecordDrop,
}

/// One flagged anomaly for a source's latest run.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub source: String,
    pub run_id: Uuid,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    pub message: &'static str,
}

/// Compares a source's latest run against its trailing baseline.
///
/// `expects_records` exempts sources whose healthy steady state processes
/// zero records (the static CSV feed) from the record-drop check.
#[must_use]
pub fn detect_anomalies(
    latest: &RunRecord,
    baseline: &RunBaseline,
    expects_records: bool,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    let Some(avg_duration) = baseline.avg_duration_ms else {
        // No successful history yet; nothing to compare against.
        return anomalies;
    };

    if latest.status == RunStatus::Failed.as_str() {
        anomalies.push(Anomaly {
            source: latest.source.clone(),
            run_id: latest.run_id,
            kind: AnomalyKind::RunFailed,
            baseline: None,
            current: None,
            message: "Latest run failed",
        });
    }

    if let Some(duration_ms) = latest.duration_ms {
        if f64::from(duration_ms) > 2.0 * avg_duration {
            anomalies.push(Anomaly {
                source: latest.source.clone(),
                run_id: latest.run_id,
                kind: AnomalyKind::DurationSpike,
                baseline: Some(avg_duration as i64),
                current: Some(i64::from(duration_ms)),
                message: "Run duration exceeded 2x historical average",
            });
        }
    }

    let avg_records = baseline.avg_records.unwrap_or(0.0);
    if expects_records && avg_records > 0.0 {
        if let Some(records) = latest.records_processed {
            if f64::from(records) < 0.5 * avg_records {
                anomalies.push(Anomaly {
                    source: latest.source.clone(),
                    run_id: latest.run_id,
                    kind: AnomalyKind::RecordDrop,
                    baseline: Some(avg_records as i64),
                    current: Some(i64::from(records)),
                    message: "Records processed dropped below 50% of baseline",
                });
            }
        }
    }

    anomalies
}

/// Filters for the market-data endpoint.
#[derive(Debug, Clone, Default)]
pub struct MarketDataFilter {
    pub asset_id: Option<Uuid>,
    pub symbol: Option<String>,
    pub source: Option<String>,
    pub from_ts: Option<DateTime<Utc>>,
    pub to_ts: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Read-only queries over the pipeline's persisted state.
#[derive(Debug, Clone)]
pub struct ReportingQueries {
    pool: PgPool,
}

impl ReportingQueries {
    /// Creates a new query handle backed by the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Checks database connectivity.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Lists all checkpoints.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let checkpoints = sqlx::query_as::<_, Checkpoint>(
            r#"
            SELECT source, last_processed_at, last_success_run_id,
                   last_failure_at, last_failure_error, status, updated_at
            FROM etl_checkpoints
            ORDER BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(checkpoints)
    }

    /// Lists recent runs across all sources, newest first.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn list_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let runs = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, source, started_at, ended_at, duration_ms,
                   status, records_processed, error_message, triggered_by
            FROM etl_runs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }

    /// Per-source run stats: latest run plus success/failure counts.
    ///
    /// # Errors
    /// Returns an error if any database query fails.
    pub async fn run_stats(&self) -> Result<Vec<SourceRunStats>> {
        let sources: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT source FROM etl_runs ORDER BY source")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = Vec::with_capacity(sources.len());
        for (source,) in sources {
            let last_run = self.latest_run(&source).await?;

            let (success_count, failure_count): (i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'success'),
                    COUNT(*) FILTER (WHERE status = 'failed')
                FROM etl_runs
                WHERE source = $1
                "#,
            )
            .bind(&source)
            .fetch_one(&self.pool)
            .await?;

            stats.push(SourceRunStats {
                source,
                last_run,
                success_count,
                failure_count,
            });
        }

        Ok(stats)
    }

    /// The most recent run for a source, regardless of outcome.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn latest_run(&self, source: &str) -> Result<Option<RunRecord>> {
        let run = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, source, started_at, ended_at, duration_ms,
                   status, records_processed, error_message, triggered_by
            FROM etl_runs
            WHERE source = $1
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    /// Trailing averages over the source's recent successful runs.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn baseline(&self, source: &str) -> Result<RunBaseline> {
        let row: Option<(Option<f64>, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT AVG(duration_ms)::FLOAT8, AVG(records_processed)::FLOAT8
            FROM (
                SELECT duration_ms, records_processed
                FROM etl_runs
                WHERE source = $1 AND status = 'success'
                ORDER BY started_at DESC
                LIMIT $2
            ) recent
            "#,
        )
        .bind(source)
        .bind(BASELINE_RUNS)
        .fetch_optional(&self.pool)
        .await?;

        let (avg_duration_ms, avg_records) = row.unwrap_or((None, None));
        Ok(RunBaseline {
            avg_duration_ms,
            avg_records,
        })
    }

    /// Flags anomalies in each source's latest run relative to its trailing
    /// baseline of successful runs.
    ///
    /// # Errors
    /// Returns an error if any database query fails.
    pub async fn compare_runs(&self, sources: &SourcesConfig) -> Result<Vec<Anomaly>> {
        let known: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT source FROM etl_runs")
            .fetch_all(&self.pool)
            .await?;

        let mut anomalies = Vec::new();
        for (source,) in known {
            let Some(latest) = self.latest_run(&source).await? else {
                continue;
            };
            let baseline = self.baseline(&source).await?;

            let expects_records = source
                .parse::<SourceKind>()
                .map(|kind| sources.for_source(kind).expects_records)
                .unwrap_or(true);

            anomalies.extend(detect_anomalies(&latest, &baseline, expects_records));
        }

        Ok(anomalies)
    }

    /// Filtered, paginated market-data rows joined with assets, newest first.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn market_data(&self, filter: &MarketDataFilter) -> Result<Vec<MarketDataRow>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT a.asset_id, a.symbol, a.name, m.source,
                   m.price_usd, m.market_cap_usd, m.volume_24h_usd, m.last_updated
            FROM asset_market_data m
            JOIN assets a ON a.asset_id = m.asset_id
            WHERE TRUE
            "#,
        );

        if let Some(asset_id) = filter.asset_id {
            builder.push(" AND a.asset_id = ").push_bind(asset_id);
        }
        if let Some(symbol) = &filter.symbol {
            builder.push(" AND a.symbol = ").push_bind(symbol.clone());
        }
        if let Some(source) = &filter.source {
            builder.push(" AND m.source = ").push_bind(source.clone());
        }
        if let Some(from_ts) = filter.from_ts {
            builder.push(" AND m.last_updated >= ").push_bind(from_ts);
        }
        if let Some(to_ts) = filter.to_ts {
            builder.push(" AND m.last_updated <= ").push_bind(to_ts);
        }

        builder
            .push(" ORDER BY m.last_updated DESC, m.id ASC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = builder
            .build_query_as::<MarketDataRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// The newest market-data row per asset per source.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn latest_market_data(&self) -> Result<Vec<MarketDataRow>> {
        let rows = sqlx::query_as::<_, MarketDataRow>(
            r#"
            SELECT DISTINCT ON (m.asset_id, m.source)
                   a.asset_id, a.symbol, a.name, m.source,
                   m.price_usd, m.market_cap_usd, m.volume_24h_usd, m.last_updated
            FROM asset_market_data m
            JOIN assets a ON a.asset_id = m.asset_id
            ORDER BY m.asset_id, m.source, m.last_updated DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: &str, duration_ms: Option<i32>, records: Option<i32>) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            source: "coingecko_markets".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms,
            status: status.to_string(),
            records_processed: records,
            error_message: None,
            triggered_by: Some("cron".to_string()),
        }
    }

    #[test]
    fn test_duration_spike_detected() {
        let latest = run("success", Some(300), Some(100));
        let baseline = RunBaseline {
            avg_duration_ms: Some(100.0),
            avg_records: Some(100.0),
        };

        let anomalies = detect_anomalies(&latest, &baseline, true);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::DurationSpike);
        assert_eq!(anomalies[0].baseline, Some(100));
        assert_eq!(anomalies[0].current, Some(300));
    }

    #[test]
    fn test_duration_exactly_double_is_not_a_spike() {
        let latest = run("success", Some(200), Some(100));
        let baseline = RunBaseline {
            avg_duration_ms: Some(100.0),
            avg_records: Some(100.0),
        };

        assert!(detect_anomalies(&latest, &baseline, true).is_empty());
    }

    #[test]
    fn test_failed_run_flagged() {
        let latest = run("failed", None, None);
        let baseline = RunBaseline {
            avg_duration_ms: Some(100.0),
            avg_records: Some(100.0),
        };

        let anomalies = detect_anomalies(&latest, &baseline, true);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::RunFailed);
    }

    #[test]
    fn test_record_drop_detected() {
        let latest = run("success", Some(100), Some(10));
        let baseline = RunBaseline {
            avg_duration_ms: Some(100.0),
            avg_records: Some(100.0),
        };

        let anomalies = detect_anomalies(&latest, &baseline, true);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::RecordDrop);
        assert_eq!(anomalies[0].baseline, Some(100));
        assert_eq!(anomalies[0].current, Some(10));
    }

    #[test]
    fn test_record_drop_exempt_source_not_flagged() {
        let latest = run("success", Some(100), Some(0));
        let baseline = RunBaseline {
            avg_duration_ms: Some(100.0),
            avg_records: Some(100.0),
        };

        assert!(detect_anomalies(&latest, &baseline, false).is_empty());
    }

    #[test]
    fn test_no_baseline_yields_no_anomalies() {
        let latest = run("failed", Some(500), Some(0));
        let baseline = RunBaseline::default();

        assert!(detect_anomalies(&latest, &baseline, true).is_empty());
    }

    #[test]
    fn test_failed_slow_run_flags_both() {
        let latest = run("failed", Some(300), Some(100));
        let baseline = RunBaseline {
            avg_duration_ms: Some(100.0),
            avg_records: Some(100.0),
        };

        let kinds: Vec<_> = detect_anomalies(&latest, &baseline, true)
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(kinds, vec![AnomalyKind::RunFailed, AnomalyKind::DurationSpike]);
    }
}
