//! Correlation keys binding inbound callbacks to a dispatched attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::combination::TestCombination;

/// Opaque token echoed back by a remote job on every callback.
///
/// Format is `{work_item}-{job_kind}-{variant}-{attempt}`. Two attempts of
/// the same combination always differ in the trailing index, so keys never
/// collide within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Derive the key for `attempt` of `combination`.
    pub fn new(combination: &TestCombination, attempt: u32) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            combination.work_item, combination.job_kind, combination.variant, attempt
        ))
    }

    /// Wrap a key received from the wire without reinterpreting it.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
