//! Orchestration for a full batch run: configuration, per-combination
//! aggregation of redundant attempts, and the summary written to the log.

pub mod aggregator;
pub mod config;
pub mod summary;

pub use aggregator::Aggregator;
pub use config::{ConfigError, LiveConfig, RunMode, RunnerConfig};
pub use summary::{log_summary, RunSummary};
