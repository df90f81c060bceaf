//! GitHub Actions client for launching and re-running remote jobs.
//!
//! Each job kind is a workflow file in one repository. Attempts are
//! launched with `workflow_dispatch`, failed runs are listed per workflow,
//! and re-runs target the run id.

use std::time::Duration;

use async_trait::async_trait;
use runcheck_callbacks::CORRELATION_HEADER;
use serde::Deserialize;

use crate::remote::{JobLauncher, LaunchRequest, RemoteApiError, RemoteJob, RemoteJobId, RemoteJobs};

/// HTTP request timeout for a single API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failed runs fetched per workflow and poll.
const RUNS_PER_PAGE: u32 = 100;

const USER_AGENT: &str = concat!("runcheck/", env!("CARGO_PKG_VERSION"));

/// Connection settings for the repository hosting the workflows.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL, e.g. `https://api.github.com`.
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    pub token: String,
    /// Git ref workflows are dispatched against.
    pub git_ref: String,
}

/// HTTP client for the GitHub Actions REST API.
pub struct GitHubActions {
    client: reqwest::Client,
    config: GitHubConfig,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    html_url: String,
}

impl GitHubActions {
    pub fn new(config: GitHubConfig) -> Result<Self, RemoteApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: GitHubConfig) -> Self {
        Self { client, config }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path.trim_start_matches('/'),
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn failed_runs(&self, job_kind: &str) -> Result<Vec<RemoteJob>, RemoteApiError> {
        let url = self.repo_url(&format!("actions/workflows/{job_kind}/runs"));
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("status", "failure"), ("per_page", &RUNS_PER_PAGE.to_string())])
            .send()
            .await?;
        let runs: WorkflowRunsResponse = Self::parse_response(response).await?;

        Ok(runs
            .workflow_runs
            .into_iter()
            .map(|run| RemoteJob {
                id: RemoteJobId(run.id),
                job_kind: job_kind.to_string(),
                url: run.html_url,
            })
            .collect())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise capture
    /// status and body in a [`RemoteApiError::Api`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), RemoteApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Body of a `workflow_dispatch` request for one attempt.
pub fn dispatch_body(request: &LaunchRequest, git_ref: &str) -> serde_json::Value {
    serde_json::json!({
        "ref": git_ref,
        "inputs": {
            "work_item": request.combination.work_item,
            "variant": request.combination.variant,
            "callback_url": request.callback_url,
            "correlation_key": request.correlation_key.as_str(),
            "correlation_header": CORRELATION_HEADER,
        },
    })
}

#[async_trait]
impl JobLauncher for GitHubActions {
    async fn launch(&self, request: &LaunchRequest) -> Result<(), RemoteApiError> {
        let url = self.repo_url(&format!(
            "actions/workflows/{}/dispatches",
            request.combination.job_kind
        ));
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&dispatch_body(request, &self.config.git_ref))
            .send()
            .await?;
        Self::check_status(response).await
    }
}

#[async_trait]
impl RemoteJobs for GitHubActions {
    /// A job kind whose listing fails is skipped; the call only fails when
    /// every job kind failed.
    async fn failed_jobs(&self, job_kinds: &[String]) -> Result<Vec<RemoteJob>, RemoteApiError> {
        let mut jobs = Vec::new();
        let mut last_error = None;
        let mut listed = 0usize;

        for job_kind in job_kinds {
            match self.failed_runs(job_kind).await {
                Ok(runs) => {
                    listed += 1;
                    jobs.extend(runs);
                }
                Err(e) => {
                    tracing::warn!(job_kind = %job_kind, error = %e, "Failed to list failed runs");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if listed == 0 => Err(e),
            _ => Ok(jobs),
        }
    }

    async fn rerun(&self, job: &RemoteJob) -> Result<(), RemoteApiError> {
        let url = self.repo_url(&format!("actions/runs/{}/rerun", job.id));
        let response = self.request(reqwest::Method::POST, url).send().await?;
        Self::check_status(response).await
    }
}
