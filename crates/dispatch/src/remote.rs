//! Seams to the remote job system.
//!
//! The dispatcher only needs to launch jobs; the retry monitor only needs
//! to list failed jobs and re-run them. Both go through traits so the
//! production GitHub client and in-memory test doubles are interchangeable.

use std::fmt;

use async_trait::async_trait;
use runcheck_core::{CorrelationKey, TestCombination};
use serde::{Deserialize, Serialize};

/// Everything a remote job needs to run one attempt and call back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub combination: TestCombination,
    pub attempt: u32,
    /// Echoed back on every callback.
    pub correlation_key: CorrelationKey,
    /// Full URL of the callback endpoint.
    pub callback_url: String,
}

/// Identity of a job in the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteJobId(pub u64);

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job as reported by the remote status API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub id: RemoteJobId,
    pub job_kind: String,
    /// Human-facing link for investigating the job.
    pub url: String,
}

/// Requests a new remote job for an attempt.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<(), RemoteApiError>;
}

/// Status and re-run access to remote jobs.
#[async_trait]
pub trait RemoteJobs: Send + Sync {
    /// Every job of the given kinds currently in a failed state.
    async fn failed_jobs(&self, job_kinds: &[String]) -> Result<Vec<RemoteJob>, RemoteApiError>;

    /// Ask the remote system to run `job` again under the same identity.
    async fn rerun(&self, job: &RemoteJob) -> Result<(), RemoteApiError>;
}

/// Errors from the remote job API layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote API returned a non-2xx status code.
    #[error("Remote API error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The request was refused before reaching the network.
    #[error("Request rejected: {0}")]
    Rejected(String),
}
