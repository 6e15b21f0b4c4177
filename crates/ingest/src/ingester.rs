//! Shared ingestion driver.
//!
//! One protocol for every source: ensure checkpoint, open a run, fetch,
//! filter by watermark, dedup by content hash, persist, then close the run
//! terminally. A failure marks the run failed and propagates; it is never
//! swallowed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::fetcher::RateLimitedFetcher;
use crate::hash::payload_hash;
use crate::sources::MarketSource;
use marketflow_core::TriggeredBy;
use marketflow_data::{raw, CheckpointStore};

/// Tracks the high-water mark over the items inserted this run.
///
/// Starts at the previous watermark, so a run with nothing new reports the
/// watermark unchanged.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkTracker {
    max_seen: Option<DateTime<Utc>>,
}

impl WatermarkTracker {
    #[must_use]
    pub fn new(previous: Option<DateTime<Utc>>) -> Self {
        Self { max_seen: previous }
    }

    /// Records an inserted item's timestamp.
    pub fn observe(&mut self, ts: DateTime<Utc>) {
        self.max_seen = Some(match self.max_seen {
            Some(current) => current.max(ts),
            None => ts,
        });
    }

    /// The watermark to report on success.
    #[must_use]
    pub fn watermark(self) -> Option<DateTime<Utc>> {
        self.max_seen
    }
}

/// Drives one source through a full ingestion run.
pub struct Ingester {
    pool: PgPool,
    checkpoints: CheckpointStore,
}

impl Ingester {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            checkpoints: CheckpointStore::new(pool.clone()),
            pool,
        }
    }

    /// Runs one ingestion cycle for a source.
    ///
    /// Returns the number of newly inserted raw records. Every started run
    /// ends in exactly one terminal state: `mark_success` on the happy path,
    /// `mark_failure` plus a propagated error otherwise.
    ///
    /// # Errors
    /// Returns an error if the fetch or any persistence step fails.
    pub async fn run(
        &self,
        source: &dyn MarketSource,
        fetcher: &RateLimitedFetcher,
        triggered_by: TriggeredBy,
    ) -> Result<i32> {
        let kind = source.kind();
        let name = kind.name();

        self.checkpoints.ensure_initialized(name).await?;
        let watermark = self
            .checkpoints
            .get(name)
            .await?
            .and_then(|cp| cp.last_processed_at);

        let run_id = Uuid::new_v4();
        self.checkpoints.start_run(name, run_id, triggered_by).await?;
        tracing::info!(source = name, %run_id, %triggered_by, ?watermark, "ingestion run started");

        match self.ingest_items(source, fetcher, watermark).await {
            Ok((inserted, tracker)) => {
                self.checkpoints
                    .mark_success(name, run_id, tracker.watermark(), inserted)
                    .await?;
                Ok(inserted)
            }
            Err(e) => {
                // Terminal mark first, then propagate; the orchestrator must
                // still see the failure.
                self.checkpoints
                    .mark_failure(name, run_id, &format!("{e:#}"))
                    .await?;
                Err(e)
            }
        }
    }

    /// All inserts for one run share a transaction, committed here only
    /// when every item persisted. A run that fails partway rolls back and
    /// leaves no raw rows, so a retry starts from a clean slate instead of
    /// hitting its own half-written rows as hash duplicates.
    async fn ingest_items(
        &self,
        source: &dyn MarketSource,
        fetcher: &RateLimitedFetcher,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<(i32, WatermarkTracker)> {
        let items = source.fetch(fetcher).await?;

        let mut tx = self.pool.begin().await?;
        let mut tracker = WatermarkTracker::new(watermark);
        let mut inserted: i32 = 0;

        for item in items {
            if let Some(watermark) = watermark {
                if item.observed_at <= watermark {
                    continue;
                }
            }

            let hash = payload_hash(&item.payload);
            let is_new = raw::insert(
                &mut tx,
                source.kind(),
                &item.source_id,
                &item.payload,
                &hash,
                Utc::now(),
            )
            .await?;

            if !is_new {
                // Same content from the same external entity; not an error.
                continue;
            }

            inserted += 1;
            tracker.observe(item.observed_at);
        }

        tx.commit().await?;
        Ok((inserted, tracker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_tracker_starts_at_previous_watermark() {
        let tracker = WatermarkTracker::new(Some(ts(10)));
        assert_eq!(tracker.watermark(), Some(ts(10)));
    }

    #[test]
    fn test_tracker_advances_to_max_seen() {
        let mut tracker = WatermarkTracker::new(Some(ts(10)));
        tracker.observe(ts(12));
        tracker.observe(ts(11));
        assert_eq!(tracker.watermark(), Some(ts(12)));
    }

    #[test]
    fn test_tracker_never_regresses() {
        let mut tracker = WatermarkTracker::new(Some(ts(10)));
        tracker.observe(ts(9));
        assert_eq!(tracker.watermark(), Some(ts(10)));
    }

    #[test]
    fn test_tracker_from_empty_history() {
        let mut tracker = WatermarkTracker::new(None);
        assert_eq!(tracker.watermark(), None);
        tracker.observe(ts(8));
        assert_eq!(tracker.watermark(), Some(ts(8)));
    }
}
