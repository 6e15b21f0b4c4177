pub mod config;
pub mod config_loader;
pub mod metrics;
pub mod source;

pub use config::{AppConfig, DatabaseConfig, ServerConfig, SourceSettings, SourcesConfig};
pub use config_loader::ConfigLoader;
pub use metrics::{metrics, PipelineMetrics};
pub use source::{SourceKind, TriggeredBy};
