//! Launching remote attempts and keeping failed remote jobs moving.
//!
//! - [`Dispatcher`] launches one remote job per attempt under a global
//!   concurrency ceiling and waits for its terminal callback.
//! - [`RetryMonitor`] polls the remote system for jobs that failed without
//!   ever calling back and re-runs them.
//! - [`GitHubActions`] implements both remote seams against the GitHub
//!   Actions REST API.

pub mod dispatcher;
pub mod github;
pub mod remote;
pub mod retry;

pub use dispatcher::{DispatchError, Dispatcher, DEFAULT_MAX_CONCURRENCY};
pub use github::{GitHubActions, GitHubConfig};
pub use remote::{JobLauncher, LaunchRequest, RemoteApiError, RemoteJob, RemoteJobId, RemoteJobs};
pub use retry::{RetryEvent, RetryMonitor, DEFAULT_RETRY_INTERVAL};
