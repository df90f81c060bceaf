//! Records assembled by the runner and persisted in the snapshot file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::combination::TestCombination;
use crate::consensus::ComparisonResult;
use crate::run_result::Capabilities;

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The remote job called back with a terminal `COMPLETED` event.
    Completed { rows: usize },
    /// The launch request was rejected; no result was collected.
    DispatchFailed { reason: String },
    /// The attempt never reached the launcher or lost its registration
    /// before a terminal callback arrived.
    Abandoned { reason: String },
}

/// Per-attempt metadata kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt_index: u32,
    pub correlation_key: String,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// Final comparison record for one combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinationReport {
    pub combination: TestCombination,
    pub comparison: ComparisonResult,
    pub attempts: Vec<AttemptRecord>,
}

impl CombinationReport {
    pub fn completed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Completed { .. }))
            .count()
    }
}

/// A remote job the retry monitor restarted during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunRecord {
    pub job_id: u64,
    pub job_kind: String,
    pub url: String,
}

/// Everything a finished run produced, in combination enumeration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub generated_at: DateTime<Utc>,
    pub attempts_per_combination: u32,
    pub combinations: Vec<CombinationReport>,
    #[serde(default)]
    pub reruns: Vec<RerunRecord>,
}

impl RunSnapshot {
    pub fn new(attempts_per_combination: u32, combinations: Vec<CombinationReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            attempts_per_combination,
            combinations,
            reruns: Vec::new(),
        }
    }

    pub fn report_for(&self, combination: &TestCombination) -> Option<&CombinationReport> {
        self.combinations
            .iter()
            .find(|report| &report.combination == combination)
    }

    /// Number of combinations where at least one attempt diverged.
    pub fn inconsistent_count(&self) -> usize {
        self.combinations
            .iter()
            .filter(|report| !report.comparison.is_consistent())
            .count()
    }
}
