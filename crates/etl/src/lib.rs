//! Orchestrates the full ingestion-checkpoint-transform cycle.

pub mod pipeline;

pub use pipeline::{EtlPipeline, PipelineStats, SourceStats};
