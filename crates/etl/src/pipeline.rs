//! The pipeline orchestrator.
//!
//! One invocation moves every source through ingest then transform:
//! ingesters run concurrently (one task per source, each committing its own
//! checkpoint transitions), transform runs sequentially per source so
//! identity resolution stays race-free. Transform metrics and the overall
//! duration are emitted even when a stage fails.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio::task::JoinSet;
use uuid::Uuid;

use marketflow_core::{metrics, SourceKind, SourcesConfig};
use marketflow_data::{CheckpointStore, RawRecordStore};
use marketflow_ingest::{make_source, Ingester, RateLimitedFetcher};
use marketflow_transform::transform_record;

/// Per-source transform outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub success: u64,
    pub failed: u64,
}

impl SourceStats {
    /// Tallies one per-record outcome.
    pub fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Aggregated outcome of one pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Newly inserted raw records per source.
    pub ingested: BTreeMap<&'static str, i32>,
    /// Transform outcomes per source.
    pub transformed: BTreeMap<&'static str, SourceStats>,
}

/// Runs ingest and transform for all configured sources.
pub struct EtlPipeline {
    pool: PgPool,
    sources: SourcesConfig,
}

impl EtlPipeline {
    #[must_use]
    pub fn new(pool: PgPool, sources: SourcesConfig) -> Self {
        Self { pool, sources }
    }

    /// Runs one full pipeline cycle.
    ///
    /// # Errors
    /// Returns the first ingest failure (after all ingesters have settled)
    /// or the first transform-stage database fault. There is no pipeline-
    /// level retry; rerunning is the caller's concern.
    pub async fn run(&self) -> Result<PipelineStats> {
        let started = Instant::now();
        let mut stats = PipelineStats::default();

        let result = self.run_stages(&mut stats).await;

        // Transform counters and the phase duration are reported even when
        // a stage failed.
        if let Some(m) = metrics() {
            for (source, counts) in &stats.transformed {
                m.record_transform(source, counts.success, counts.failed);
            }
            m.observe_transform_duration(started.elapsed().as_secs_f64());
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ?stats,
                    "pipeline completed"
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::error!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = format!("{e:#}"),
                    "pipeline failed"
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&self, stats: &mut PipelineStats) -> Result<()> {
        // Watermarks are captured before ingest so records ingested this
        // cycle are transformed in the same cycle.
        let watermarks = self.capture_watermarks().await?;

        self.ingest_stage(stats).await?;
        self.transform_stage(stats, &watermarks).await?;
        Ok(())
    }

    async fn capture_watermarks(&self) -> Result<HashMap<SourceKind, Option<DateTime<Utc>>>> {
        let checkpoints = CheckpointStore::new(self.pool.clone());
        let mut watermarks = HashMap::new();
        for kind in SourceKind::ALL {
            let watermark = checkpoints
                .get(kind.name())
                .await?
                .and_then(|cp| cp.last_processed_at);
            watermarks.insert(kind, watermark);
        }
        Ok(watermarks)
    }

    /// Runs every ingester concurrently and waits for all of them.
    ///
    /// The join set is drained completely before any error is returned, so
    /// each per-source transaction has settled; successful ingesters keep
    /// their committed records and advanced watermarks even when a sibling
    /// fails the stage.
    async fn ingest_stage(&self, stats: &mut PipelineStats) -> Result<()> {
        tracing::info!(stage = "ingest", "starting ingest stage");

        let mut tasks: JoinSet<Result<(SourceKind, i32)>> = JoinSet::new();
        for kind in SourceKind::ALL {
            let settings = self.sources.for_source(kind).clone();
            let pool = self.pool.clone();
            tasks.spawn(async move {
                let fetcher = RateLimitedFetcher::new(&settings)?;
                let source = make_source(kind, &settings);
                let inserted = Ingester::new(pool)
                    .run(source.as_ref(), &fetcher, kind.default_trigger())
                    .await
                    .with_context(|| format!("ingesting {}", kind.name()))?;
                Ok((kind, inserted))
            });
        }

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((kind, inserted))) => {
                    stats.ingested.insert(kind.name(), inserted);
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow::Error::from(join_error));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e.context("ingest stage failed")),
            None => Ok(()),
        }
    }

    /// Transforms each source's new raw records, one transaction per source
    /// batch, sequentially.
    async fn transform_stage(
        &self,
        stats: &mut PipelineStats,
        watermarks: &HashMap<SourceKind, Option<DateTime<Utc>>>,
    ) -> Result<()> {
        tracing::info!(stage = "transform", "starting transform stage");

        // One run id correlates every failure row from this invocation.
        let run_id = Uuid::new_v4();
        let raw = RawRecordStore::new(self.pool.clone());

        for kind in SourceKind::ALL {
            let since = watermarks.get(&kind).copied().flatten();
            let records = raw.load_since(kind, since).await?;

            let mut tx = self.pool.begin().await?;
            let mut counts = SourceStats::default();
            for record in &records {
                let succeeded = transform_record(&mut *tx, kind, record, run_id)
                    .await
                    .with_context(|| format!("transforming {}", kind.name()))?;
                counts.record(succeeded);
            }
            tx.commit().await?;

            tracing::info!(
                source = kind.name(),
                %run_id,
                success = counts.success,
                failed = counts.failed,
                "transform batch committed"
            );
            stats.transformed.insert(kind.name(), counts);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_stats_tally() {
        let mut counts = SourceStats::default();
        counts.record(true);
        counts.record(true);
        counts.record(false);
        assert_eq!(
            counts,
            SourceStats {
                success: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_pipeline_stats_default_is_empty() {
        let stats = PipelineStats::default();
        assert!(stats.ingested.is_empty());
        assert!(stats.transformed.is_empty());
    }
}
