//! `runcheck` -- runs every test combination several times on remote CI
//! runners and reports where the runs disagree.
//!
//! Configuration comes from the environment (see
//! [`RunnerConfig::from_env`]). Set `LOAD_SNAPSHOT` to summarise an
//! earlier run instead of dispatching new jobs, and `LOG_FORMAT=json` for
//! machine-readable logs.

use std::sync::Arc;

use runcheck_callbacks::{CallbackListener, CallbackRegistry, CALLBACK_PATH};
use runcheck_core::{snapshot, RerunRecord, RunSnapshot};
use runcheck_dispatch::{Dispatcher, GitHubActions, RetryEvent, RetryMonitor};
use runcheck_runner::{log_summary, Aggregator, LiveConfig, RunMode, RunnerConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "runcheck_runner=info,runcheck_dispatch=info,runcheck_callbacks=info,tower_http=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = RunnerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let snapshot = match config.mode {
        RunMode::Replay(path) => match snapshot::load(&path) {
            Ok(snapshot) => {
                tracing::info!(path = %path.display(), "Loaded snapshot");
                snapshot
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load snapshot");
                std::process::exit(1);
            }
        },
        RunMode::Live(live) => match run_live(*live).await {
            Some(snapshot) => snapshot,
            None => {
                tracing::warn!("Run interrupted before all combinations finished, nothing saved");
                return;
            }
        },
    };

    if let Some(path) = &config.snapshot_path {
        match snapshot::save(path, &snapshot) {
            Ok(()) => tracing::info!(path = %path.display(), "Snapshot written"),
            Err(e) => tracing::error!(error = %e, "Failed to write snapshot"),
        }
    }

    log_summary(&snapshot);
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Dispatch every combination and collect the snapshot.
///
/// Setup failures exit the process. Returns `None` when interrupted by a
/// shutdown signal.
async fn run_live(config: LiveConfig) -> Option<RunSnapshot> {
    tracing::info!(
        combinations = config.combinations.len(),
        attempts = config.attempts,
        max_concurrency = config.max_concurrency,
        "Starting runcheck",
    );

    // --- Callback listener ---
    let registry = Arc::new(CallbackRegistry::new());
    let listener = CallbackListener::bind(config.callback_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Callback listener could not bind");
            std::process::exit(1);
        });
    let listener_cancel = CancellationToken::new();
    let listener_handle = tokio::spawn(listener.serve(Arc::clone(&registry), listener_cancel.clone()));

    // --- Remote API ---
    let github = Arc::new(GitHubActions::new(config.github.clone()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build GitHub client");
        std::process::exit(1);
    }));

    // --- Retry monitor ---
    let monitor = RetryMonitor::start(github.clone(), config.job_kinds.clone(), config.retry_interval)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to record pre-existing failed jobs");
            std::process::exit(1);
        });
    let monitor_cancel = CancellationToken::new();
    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel();
    let monitor_handle = tokio::spawn(monitor.run(monitor_cancel.clone(), retry_tx));

    // --- Dispatch ---
    let callback_url = format!(
        "{}{}",
        config.public_callback_url.trim_end_matches('/'),
        CALLBACK_PATH
    );
    tracing::info!(%callback_url, "Remote jobs will call back here");

    let dispatcher = Arc::new(Dispatcher::new(
        github,
        Arc::clone(&registry),
        callback_url,
        config.max_concurrency,
    ));
    let aggregator = Aggregator::new(dispatcher, config.attempts);

    let reports = tokio::select! {
        reports = aggregator.run_all(&config.combinations) => Some(reports),
        () = shutdown_signal() => None,
    };

    // --- Shutdown ---
    monitor_cancel.cancel();
    if let Err(e) = monitor_handle.await {
        tracing::error!(error = %e, "Retry monitor task failed");
    }

    let mut reruns = Vec::new();
    while let Some(event) = retry_rx.recv().await {
        if let RetryEvent::Rerun(job) = event {
            reruns.push(RerunRecord {
                job_id: job.id.0,
                job_kind: job.job_kind,
                url: job.url,
            });
        }
    }

    listener_cancel.cancel();
    match listener_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Callback listener failed"),
        Err(e) => tracing::error!(error = %e, "Callback listener task failed"),
    }

    let mut snapshot = RunSnapshot::new(config.attempts, reports?);
    snapshot.reruns = reruns;
    Some(snapshot)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), abandoning in-flight attempts");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, abandoning in-flight attempts");
        }
    }
}
