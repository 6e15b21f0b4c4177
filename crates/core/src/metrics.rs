//! Prometheus metrics for the ingestion and transform pipeline.
//!
//! Registered once into the default registry; the web API exposes it in text
//! format on `/metrics`.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    CounterVec, GaugeVec, Histogram, HistogramVec,
};

/// Run duration buckets in seconds. Ingestion runs are dominated by pacing
/// sleeps, so the range extends well past a minute.
const RUN_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

static METRICS: Lazy<Result<PipelineMetrics>> = Lazy::new(PipelineMetrics::new);

/// Returns the global metrics instance, or `None` if registration failed.
///
/// Registration only fails on duplicate metric names, which would be a
/// programming error; callers skip emission rather than aborting pipeline
/// work.
pub fn metrics() -> Option<&'static PipelineMetrics> {
    match METRICS.as_ref() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::error!(error = %e, "metrics registry unavailable");
            None
        }
    }
}

/// Container for all pipeline metrics.
pub struct PipelineMetrics {
    /// Ingestion run counter - labels: source, status (success/failed)
    pub ingestion_runs_total: CounterVec,

    /// Newly ingested record counter - labels: source
    pub ingestion_records_processed_total: CounterVec,

    /// Ingestion run duration histogram - labels: source
    pub ingestion_run_duration_seconds: HistogramVec,

    /// Unix timestamp of the last successful run - labels: source
    pub ingestion_last_success_timestamp: GaugeVec,

    /// Transformed record counter - labels: source, status (success/failed)
    pub transform_records_total: CounterVec,

    /// Duration of one whole transform phase
    pub transform_run_duration_seconds: Histogram,
}

impl PipelineMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            ingestion_runs_total: register_counter_vec!(
                "ingestion_runs_total",
                "Total ingestion runs",
                &["source", "status"]
            )
            .context("register ingestion_runs_total")?,

            ingestion_records_processed_total: register_counter_vec!(
                "ingestion_records_processed_total",
                "Total records processed by ingestion",
                &["source"]
            )
            .context("register ingestion_records_processed_total")?,

            ingestion_run_duration_seconds: register_histogram_vec!(
                "ingestion_run_duration_seconds",
                "Ingestion run duration in seconds",
                &["source"],
                RUN_DURATION_BUCKETS.to_vec()
            )
            .context("register ingestion_run_duration_seconds")?,

            ingestion_last_success_timestamp: register_gauge_vec!(
                "ingestion_last_success_timestamp",
                "Last successful ingestion run timestamp",
                &["source"]
            )
            .context("register ingestion_last_success_timestamp")?,

            transform_records_total: register_counter_vec!(
                "transform_records_total",
                "Total records processed in transform",
                &["source", "status"]
            )
            .context("register transform_records_total")?,

            transform_run_duration_seconds: register_histogram!(
                "transform_run_duration_seconds",
                "Duration of the transform phase in seconds",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .context("register transform_run_duration_seconds")?,
        })
    }

    /// Records a successful ingestion run.
    pub fn record_ingestion_success(
        &self,
        source: &str,
        records_processed: u64,
        duration_secs: f64,
        success_ts: f64,
    ) {
        self.ingestion_runs_total
            .with_label_values(&[source, "success"])
            .inc();
        self.ingestion_records_processed_total
            .with_label_values(&[source])
            .inc_by(records_processed as f64);
        self.ingestion_run_duration_seconds
            .with_label_values(&[source])
            .observe(duration_secs);
        self.ingestion_last_success_timestamp
            .with_label_values(&[source])
            .set(success_ts);
    }

    /// Records a failed ingestion run.
    pub fn record_ingestion_failure(&self, source: &str) {
        self.ingestion_runs_total
            .with_label_values(&[source, "failed"])
            .inc();
    }

    /// Records per-source transform outcomes.
    pub fn record_transform(&self, source: &str, success: u64, failed: u64) {
        self.transform_records_total
            .with_label_values(&[source, "success"])
            .inc_by(success as f64);
        self.transform_records_total
            .with_label_values(&[source, "failed"])
            .inc_by(failed as f64);
    }

    /// Records the duration of one transform phase.
    pub fn observe_transform_duration(&self, duration_secs: f64) {
        self.transform_run_duration_seconds.observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let m = metrics().expect("metrics should register");
        m.record_ingestion_success("coingecko_markets", 42, 1.5, 1_700_000_000.0);
        m.record_ingestion_failure("coinpaprika_tickers");
        m.record_transform("csv_market_data", 2, 1);
        m.observe_transform_duration(0.25);
    }
}
