//! Postgres storage layer for the marketflow pipeline.
//!
//! This crate provides:
//! - Connection pool construction and schema bootstrap
//! - The per-source checkpoint store and run ledger
//! - Raw-record persistence, dedup lookups, and ordered replay
//! - Normalized-entity writes used by the transform stage
//! - Read accessors for the reporting layer

pub mod checkpoints;
pub mod database;
pub mod models;
pub mod normalized;
pub mod raw;
pub mod reporting;

pub use checkpoints::CheckpointStore;
pub use database::{connect, run_migrations};
pub use models::{
    Asset, Checkpoint, CheckpointStatus, MarketDataRow, RawRecord, RunRecord, RunStatus,
};
pub use raw::RawRecordStore;
pub use reporting::{
    detect_anomalies, Anomaly, AnomalyKind, MarketDataFilter, ReportingQueries, RunBaseline,
    SourceRunStats,
};
