//! Transforms raw source payloads into the normalized asset model.
//!
//! Parsing and validation are explicit `Result`s so a bad record is a
//! per-record outcome, never an exception that aborts the batch.

pub mod observation;
pub mod transformer;

pub use observation::{parse_observation, MarketObservation, TransformError};
pub use transformer::{resolve_asset_id, transform_record};
