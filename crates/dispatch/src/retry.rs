//! Background re-run of remote jobs that failed outside the callback path.
//!
//! A remote job can crash before it ever calls back, leaving its attempt
//! waiting forever. [`RetryMonitor`] closes that gap by polling the remote
//! status API on a fixed interval and re-running every job that failed
//! since the monitor started. It knows nothing about correlation keys:
//! it works purely on remote job identities and reports what it did over
//! an `mpsc` channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::remote::{RemoteApiError, RemoteJob, RemoteJobId, RemoteJobs};

/// Default polling interval.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Notifications published by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A newly failed job was re-run.
    Rerun(RemoteJob),
    /// The re-run request failed; the job is retried on the next tick.
    RerunFailed { job: RemoteJob, error: String },
    /// Listing failed jobs failed; the tick was skipped.
    PollFailed { error: String },
}

/// Watches the remote system for failed jobs and re-runs new ones.
pub struct RetryMonitor {
    jobs: Arc<dyn RemoteJobs>,
    job_kinds: Vec<String>,
    interval: Duration,
    /// Pre-existing failures plus every job already re-run.
    handled: HashSet<RemoteJobId>,
}

impl RetryMonitor {
    /// Record the jobs that are already failed before any dispatch starts.
    ///
    /// Those jobs belong to earlier runs and are never touched. An error
    /// here is a setup failure: without the snapshot the monitor cannot
    /// tell old failures from new ones.
    pub async fn start(
        jobs: Arc<dyn RemoteJobs>,
        job_kinds: Vec<String>,
        interval: Duration,
    ) -> Result<Self, RemoteApiError> {
        let existing = jobs.failed_jobs(&job_kinds).await?;
        let handled: HashSet<RemoteJobId> = existing.iter().map(|job| job.id).collect();

        tracing::info!(
            pre_existing = handled.len(),
            job_kinds = ?job_kinds,
            interval_secs = interval.as_secs(),
            "Retry monitor recorded pre-existing failed jobs",
        );

        Ok(Self {
            jobs,
            job_kinds,
            interval,
            handled,
        })
    }

    /// Number of job identities the monitor will not re-run.
    pub fn handled_count(&self) -> usize {
        self.handled.len()
    }

    /// One polling tick: re-run every failed job not seen before.
    pub async fn poll_once(&mut self) -> Result<Vec<RetryEvent>, RemoteApiError> {
        let failed = self.jobs.failed_jobs(&self.job_kinds).await?;
        let mut events = Vec::new();

        for job in failed {
            if self.handled.contains(&job.id) {
                continue;
            }

            tracing::warn!(
                job_id = %job.id,
                job_kind = %job.job_kind,
                url = %job.url,
                "Remote job failed without calling back, re-running",
            );

            match self.jobs.rerun(&job).await {
                Ok(()) => {
                    self.handled.insert(job.id);
                    events.push(RetryEvent::Rerun(job));
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id,
                        url = %job.url,
                        error = %e,
                        "Re-run request failed, will retry on next poll",
                    );
                    events.push(RetryEvent::RerunFailed {
                        job,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(events)
    }

    /// Poll on the configured interval until `cancel` is triggered.
    ///
    /// The first poll happens one interval after the call. Errors are
    /// logged and reported on `events`; they never stop the loop.
    pub async fn run(mut self, cancel: CancellationToken, events: mpsc::UnboundedSender<RetryEvent>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Retry monitor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(handled = self.handled.len(), "Retry monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(batch) => {
                            for event in batch {
                                let _ = events.send(event);
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to poll remote jobs");
                            let _ = events.send(RetryEvent::PollFailed { error: e.to_string() });
                        }
                    }
                }
            }
        }
    }
}
