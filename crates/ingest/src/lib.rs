//! Rate-limited ingestion from external market-data sources.
//!
//! This crate provides:
//! - A paced, retrying HTTP fetcher with a typed failure taxonomy
//! - Canonical payload hashing for content dedup
//! - One `MarketSource` implementation per external feed
//! - The shared ingestion driver tying fetch, dedup, and checkpoints together

pub mod error;
pub mod fetcher;
pub mod hash;
pub mod ingester;
pub mod sources;

pub use error::FetchError;
pub use fetcher::RateLimitedFetcher;
pub use hash::payload_hash;
pub use ingester::Ingester;
pub use sources::{
    make_source, CoingeckoSource, CoinpaprikaSource, CsvFeedSource, MarketSource, RawItem,
};
