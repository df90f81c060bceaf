use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use runcheck_core::{enumerate_combinations, CoreError, TestCombination};
use runcheck_dispatch::{GitHubConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_RETRY_INTERVAL};

/// Default number of redundant attempts per combination.
pub const DEFAULT_ATTEMPTS: u32 = 3;

const DEFAULT_CALLBACK_HOST: &str = "0.0.0.0";
const DEFAULT_CALLBACK_PORT: u16 = 8787;
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_GITHUB_REF: &str = "main";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must list at least one value")]
    EmptyList(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error(transparent)]
    Combination(#[from] CoreError),
}

/// What the process does once configured.
#[derive(Debug, Clone)]
pub enum RunMode {
    /// Summarise a previously written snapshot without dispatching anything.
    Replay(PathBuf),
    /// Dispatch every combination against the remote system.
    Live(Box<LiveConfig>),
}

/// Settings only needed when dispatching remote jobs.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Listener bind address.
    pub callback_addr: SocketAddr,
    /// Public base URL remote jobs reach the listener on.
    pub public_callback_url: String,
    pub max_concurrency: usize,
    pub attempts: u32,
    pub retry_interval: Duration,
    pub job_kinds: Vec<String>,
    /// Cross product of work items, job kinds and variants.
    pub combinations: Vec<TestCombination>,
    pub github: GitHubConfig,
}

/// Runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: RunMode,
    /// Where to write the snapshot after a live run.
    pub snapshot_path: Option<PathBuf>,
}

impl RunnerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var               | Default                  |
    /// |-----------------------|--------------------------|
    /// | `CALLBACK_HOST`       | `0.0.0.0`                |
    /// | `CALLBACK_PORT`       | `8787`                   |
    /// | `PUBLIC_CALLBACK_URL` | required for live runs   |
    /// | `MAX_CONCURRENCY`     | `8`                      |
    /// | `ATTEMPTS`            | `3`                      |
    /// | `RETRY_INTERVAL_SECS` | `60`                     |
    /// | `JOB_KINDS`           | required for live runs   |
    /// | `VARIANTS`            | required for live runs   |
    /// | `WORK_ITEMS`          | required for live runs   |
    /// | `GITHUB_API_URL`      | `https://api.github.com` |
    /// | `GITHUB_OWNER`        | required for live runs   |
    /// | `GITHUB_REPO`         | required for live runs   |
    /// | `GITHUB_TOKEN`        | required for live runs   |
    /// | `GITHUB_REF`          | `main`                   |
    /// | `SNAPSHOT_PATH`       | unset                    |
    /// | `LOAD_SNAPSHOT`       | unset                    |
    ///
    /// When `LOAD_SNAPSHOT` is set the live-only variables are not read.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let snapshot_path = vars.optional("SNAPSHOT_PATH").map(PathBuf::from);

        let mode = match vars.optional("LOAD_SNAPSHOT") {
            Some(path) => RunMode::Replay(PathBuf::from(path)),
            None => RunMode::Live(Box::new(LiveConfig::from_vars(&vars)?)),
        };

        Ok(Self {
            mode,
            snapshot_path,
        })
    }
}

impl LiveConfig {
    fn from_vars<F>(vars: &Vars<F>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = vars.parsed(
            "CALLBACK_HOST",
            DEFAULT_CALLBACK_HOST.parse().ok(),
            "an IP address",
        )?;
        let port: u16 = vars.parsed("CALLBACK_PORT", Some(DEFAULT_CALLBACK_PORT), "a valid port")?;

        let public_callback_url = vars.required("PUBLIC_CALLBACK_URL")?;

        let max_concurrency: usize = vars.parsed(
            "MAX_CONCURRENCY",
            Some(DEFAULT_MAX_CONCURRENCY),
            "a positive integer",
        )?;
        if max_concurrency == 0 {
            return Err(ConfigError::Zero("MAX_CONCURRENCY"));
        }

        let attempts: u32 = vars.parsed("ATTEMPTS", Some(DEFAULT_ATTEMPTS), "a positive integer")?;
        if attempts == 0 {
            return Err(ConfigError::Zero("ATTEMPTS"));
        }

        let retry_interval_secs: u64 = vars.parsed(
            "RETRY_INTERVAL_SECS",
            Some(DEFAULT_RETRY_INTERVAL.as_secs()),
            "a positive number of seconds",
        )?;
        if retry_interval_secs == 0 {
            return Err(ConfigError::Zero("RETRY_INTERVAL_SECS"));
        }

        let job_kinds = vars.list("JOB_KINDS")?;
        let variants = vars.list("VARIANTS")?;
        let work_items = vars.list("WORK_ITEMS")?;
        let combinations = enumerate_combinations(&work_items, &job_kinds, &variants)?;

        let github = GitHubConfig {
            api_url: vars
                .optional("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.into()),
            owner: vars.required("GITHUB_OWNER")?,
            repo: vars.required("GITHUB_REPO")?,
            token: vars.required("GITHUB_TOKEN")?,
            git_ref: vars
                .optional("GITHUB_REF")
                .unwrap_or_else(|| DEFAULT_GITHUB_REF.into()),
        };

        Ok(Self {
            callback_addr: SocketAddr::new(host, port),
            public_callback_url,
            max_concurrency,
            attempts,
            retry_interval: Duration::from_secs(retry_interval_secs),
            job_kinds,
            combinations,
            github,
        })
    }
}

// ---------------------------------------------------------------------------
// Variable access
// ---------------------------------------------------------------------------

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    /// Parse a value, falling back to `default` when unset.
    fn parsed<T: std::str::FromStr>(
        &self,
        name: &'static str,
        default: Option<T>,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.optional(name) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value,
            }),
            None => default.ok_or(ConfigError::Missing(name)),
        }
    }

    /// Comma-separated, non-empty list.
    fn list(&self, name: &'static str) -> Result<Vec<String>, ConfigError> {
        let raw = self.required(name)?;
        let items: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            return Err(ConfigError::EmptyList(name));
        }
        Ok(items)
    }
}
