//! Domain model and pure logic for repeated remote test runs.
//!
//! Everything in this crate is free of network I/O: test combinations and
//! their correlation keys, the per-attempt run results gathered from
//! callbacks, the consensus engine that reduces redundant runs to a
//! baseline plus divergences, and the flat snapshot file the runner
//! writes once a batch has finished.

pub mod combination;
pub mod consensus;
pub mod correlation;
pub mod error;
pub mod report;
pub mod run_result;
pub mod snapshot;

pub use combination::{enumerate_combinations, TestCombination};
pub use consensus::{compare, AttemptRun, ComparisonResult, Divergence, RowComparison};
pub use correlation::CorrelationKey;
pub use error::CoreError;
pub use report::{AttemptOutcome, AttemptRecord, CombinationReport, RerunRecord, RunSnapshot};
pub use run_result::{Capabilities, RowResult, RunResult};
pub use snapshot::SnapshotError;
