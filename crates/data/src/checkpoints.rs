//! Per-source checkpoint store and run ledger.
//!
//! Every operation here is a single transaction; a run row and its
//! checkpoint transition always commit together. The watermark
//! (`last_processed_at`) only ever moves forward, and only on success.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Checkpoint, CheckpointStatus, RunStatus};
use marketflow_core::{metrics, TriggeredBy};

/// Durable per-source watermark and run-lifecycle ledger.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pool: PgPool,
}

impl CheckpointStore {
    /// Creates a new store backed by the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts an idle checkpoint row for the source if none exists.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn ensure_initialized(&self, source: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO etl_checkpoints (source, status, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (source) DO NOTHING
            "#,
        )
        .bind(source)
        .bind(CheckpointStatus::Idle.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches the checkpoint for a source.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn get(&self, source: &str) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            r#"
            SELECT source, last_processed_at, last_success_run_id,
                   last_failure_at, last_failure_error, status, updated_at
            FROM etl_checkpoints
            WHERE source = $1
            "#,
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        Ok(checkpoint)
    }

    /// Opens a run: inserts a "running" run row and flips the checkpoint to
    /// "running", in one transaction.
    ///
    /// # Errors
    /// Returns an error if the database transaction fails.
    pub async fn start_run(
        &self,
        source: &str,
        run_id: Uuid,
        triggered_by: TriggeredBy,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO etl_runs (run_id, source, started_at, status, triggered_by)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run_id)
        .bind(source)
        .bind(now)
        .bind(RunStatus::Running.as_str())
        .bind(triggered_by.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE etl_checkpoints
            SET status = $2, updated_at = $3
            WHERE source = $1
            "#,
        )
        .bind(source)
        .bind(CheckpointStatus::Running.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Closes a run as successful and advances the checkpoint.
    ///
    /// The watermark moves to `GREATEST(existing, new_watermark)`, so a
    /// success reporting an older timestamp can never rewind resumption.
    /// Failure fields are cleared. Emits run metrics as a side effect.
    ///
    /// # Errors
    /// Returns an error if the run row is missing or the transaction fails.
    pub async fn mark_success(
        &self,
        source: &str,
        run_id: Uuid,
        new_watermark: Option<DateTime<Utc>>,
        records_processed: i32,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let (started_at,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            SELECT started_at FROM etl_runs WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("no run row for run_id {run_id}"))?;

        let duration = now - started_at;
        let duration_ms = i32::try_from(duration.num_milliseconds()).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            UPDATE etl_runs
            SET ended_at = $2, duration_ms = $3, status = $4, records_processed = $5
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(now)
        .bind(duration_ms)
        .bind(RunStatus::Success.as_str())
        .bind(records_processed)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE etl_checkpoints
            SET last_processed_at = GREATEST(last_processed_at, $2),
                last_success_run_id = $3,
                status = $4,
                last_failure_at = NULL,
                last_failure_error = NULL,
                updated_at = $5
            WHERE source = $1
            "#,
        )
        .bind(source)
        .bind(new_watermark)
        .bind(run_id)
        .bind(CheckpointStatus::Success.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            source,
            %run_id,
            records_processed,
            duration_ms,
            "ingestion run succeeded"
        );

        if let Some(m) = metrics() {
            m.record_ingestion_success(
                source,
                u64::try_from(records_processed).unwrap_or(0),
                duration.num_milliseconds() as f64 / 1000.0,
                now.timestamp() as f64,
            );
        }

        Ok(())
    }

    /// Closes a run as failed and records the failure on the checkpoint.
    ///
    /// The watermark is left untouched; failed runs never advance the
    /// resumption point.
    ///
    /// # Errors
    /// Returns an error if the database transaction fails.
    pub async fn mark_failure(&self, source: &str, run_id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE etl_runs
            SET ended_at = $2, status = $3, error_message = $4
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(now)
        .bind(RunStatus::Failed.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE etl_checkpoints
            SET status = $2, last_failure_at = $3, last_failure_error = $4, updated_at = $3
            WHERE source = $1
            "#,
        )
        .bind(source)
        .bind(CheckpointStatus::Failed.as_str())
        .bind(now)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::warn!(source, %run_id, error, "ingestion run failed");

        if let Some(m) = metrics() {
            m.record_ingestion_failure(source);
        }

        Ok(())
    }
}
