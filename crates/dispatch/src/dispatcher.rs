//! Bounded-concurrency attempt dispatcher.
//!
//! Each attempt holds one slot of a fair [`Semaphore`] from before its
//! callback registration until its terminal callback arrives. The slot is
//! an RAII permit, so every exit path (success, rejected launch, abandoned
//! registration, panic) gives it back.

use std::sync::Arc;

use runcheck_callbacks::{CallbackRegistry, RegistryError};
use runcheck_core::{CorrelationKey, RunResult, TestCombination};
use tokio::sync::Semaphore;

use crate::remote::{JobLauncher, LaunchRequest, RemoteApiError};

/// Default number of attempts allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Errors surfaced for a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The launch request was rejected. The attempt contributes no result.
    #[error("Dispatch of attempt {key} failed: {source}")]
    AttemptDispatchFailed {
        key: CorrelationKey,
        #[source]
        source: RemoteApiError,
    },

    /// Registering or awaiting the callback failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The concurrency arbiter was shut down.
    #[error("Dispatcher is closed")]
    Closed,
}

/// Launches attempts without exceeding a global concurrency ceiling.
pub struct Dispatcher {
    launcher: Arc<dyn JobLauncher>,
    registry: Arc<CallbackRegistry>,
    callback_url: String,
    slots: Semaphore,
    ceiling: usize,
}

impl Dispatcher {
    /// Create a dispatcher. A `ceiling` of zero is treated as one.
    ///
    /// * `callback_url` - full public URL of the callback endpoint.
    pub fn new(
        launcher: Arc<dyn JobLauncher>,
        registry: Arc<CallbackRegistry>,
        callback_url: String,
        ceiling: usize,
    ) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            launcher,
            registry,
            callback_url,
            slots: Semaphore::new(ceiling),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Attempts currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.ceiling - self.slots.available_permits()
    }

    /// Launch `attempt` of `combination` and wait for its result.
    ///
    /// The callback registration happens before the launch request so a
    /// callback racing the launch response is never lost. The slot is
    /// released as soon as the outcome is known.
    pub async fn dispatch_and_await(
        &self,
        combination: &TestCombination,
        attempt: u32,
    ) -> Result<RunResult, DispatchError> {
        let key = CorrelationKey::new(combination, attempt);

        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| DispatchError::Closed)?;

        let registration = self.registry.register(key.clone())?;

        let request = LaunchRequest {
            combination: combination.clone(),
            attempt,
            correlation_key: key.clone(),
            callback_url: self.callback_url.clone(),
        };

        if let Err(source) = self.launcher.launch(&request).await {
            tracing::error!(
                work_item = %combination.work_item,
                job_kind = %combination.job_kind,
                variant = %combination.variant,
                attempt,
                error = %source,
                "Failed to launch remote job",
            );
            return Err(DispatchError::AttemptDispatchFailed { key, source });
        }

        tracing::info!(
            work_item = %combination.work_item,
            job_kind = %combination.job_kind,
            variant = %combination.variant,
            attempt,
            in_flight = self.in_flight(),
            "Remote job launched, awaiting callback",
        );

        let result = registration.completion().await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use runcheck_callbacks::{CallbackPayload, CallbackStatus};
    use tokio::sync::mpsc;

    use super::*;

    /// Records launches on a channel; optionally rejects some attempts.
    struct ChannelLauncher {
        launched: mpsc::UnboundedSender<LaunchRequest>,
        reject_attempt: Option<u32>,
    }

    #[async_trait]
    impl JobLauncher for ChannelLauncher {
        async fn launch(&self, request: &LaunchRequest) -> Result<(), RemoteApiError> {
            if self.reject_attempt == Some(request.attempt) {
                return Err(RemoteApiError::Api {
                    status: 422,
                    body: "Unexpected inputs provided".into(),
                });
            }
            let _ = self.launched.send(request.clone());
            Ok(())
        }
    }

    /// Calls back synchronously before the launch request returns.
    struct EagerLauncher {
        registry: Arc<CallbackRegistry>,
    }

    #[async_trait]
    impl JobLauncher for EagerLauncher {
        async fn launch(&self, request: &LaunchRequest) -> Result<(), RemoteApiError> {
            let key = &request.correlation_key;
            self.registry
                .deliver(
                    key,
                    CallbackPayload::new(CallbackStatus::RunningPartial)
                        .with_row(1, vec!["fast".into()]),
                )
                .map_err(|e| RemoteApiError::Rejected(e.to_string()))?;
            self.registry
                .deliver(key, CallbackPayload::new(CallbackStatus::Completed))
                .map_err(|e| RemoteApiError::Rejected(e.to_string()))?;
            Ok(())
        }
    }

    fn combination() -> TestCombination {
        TestCombination::new("X", "chrome", "plan1").unwrap()
    }

    fn setup(
        ceiling: usize,
        reject_attempt: Option<u32>,
    ) -> (
        Arc<Dispatcher>,
        Arc<CallbackRegistry>,
        mpsc::UnboundedReceiver<LaunchRequest>,
    ) {
        let registry = Arc::new(CallbackRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(ChannelLauncher {
            launched: tx,
            reject_attempt,
        });
        let dispatcher = Arc::new(Dispatcher::new(
            launcher,
            Arc::clone(&registry),
            "https://tunnel.example/callback".into(),
            ceiling,
        ));
        (dispatcher, registry, rx)
    }

    fn complete(registry: &CallbackRegistry, key: &CorrelationKey, value: &str) {
        registry
            .deliver(
                key,
                CallbackPayload::new(CallbackStatus::RunningPartial).with_row(1, vec![value.into()]),
            )
            .unwrap();
        registry
            .deliver(key, CallbackPayload::new(CallbackStatus::Completed))
            .unwrap();
    }

    #[tokio::test]
    async fn never_more_than_ceiling_in_flight() {
        let (dispatcher, registry, mut launched) = setup(2, None);

        let tasks: Vec<_> = (0..5u32)
            .map(|attempt| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { dispatcher.dispatch_and_await(&combination(), attempt).await })
            })
            .collect();

        let mut max_seen = 0;
        for _ in 0..5 {
            let request = tokio::time::timeout(Duration::from_secs(5), launched.recv())
                .await
                .expect("a launch should happen")
                .unwrap();

            // Give every other task a chance to try to grab a slot.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let pending = registry.pending_count();
            assert!(pending <= 2, "{pending} attempts awaiting callbacks");
            assert!(dispatcher.in_flight() <= 2);
            max_seen = max_seen.max(pending);

            complete(&registry, &request.correlation_key, "ok");
        }

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(max_seen, 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn launch_carries_key_and_callback_url() {
        let (dispatcher, registry, mut launched) = setup(8, None);

        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch_and_await(&combination(), 3).await })
        };

        let request = launched.recv().await.unwrap();
        assert_eq!(request.correlation_key.as_str(), "plan1-X-chrome-3");
        assert_eq!(request.callback_url, "https://tunnel.example/callback");
        assert_eq!(request.combination, combination());

        complete(&registry, &request.correlation_key, "value");
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.latest(1), Some(&["value".to_string()][..]));
    }

    #[tokio::test]
    async fn rejected_launch_releases_slot_and_registration() {
        let (dispatcher, registry, _launched) = setup(1, Some(0));

        let err = dispatcher
            .dispatch_and_await(&combination(), 0)
            .await
            .unwrap_err();

        assert_matches!(
            err,
            DispatchError::AttemptDispatchFailed { ref key, source: RemoteApiError::Api { status: 422, .. } }
                if key.as_str() == "plan1-X-chrome-0"
        );
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn rejected_launch_does_not_block_later_attempts() {
        let (dispatcher, registry, mut launched) = setup(1, Some(0));

        assert!(dispatcher.dispatch_and_await(&combination(), 0).await.is_err());

        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch_and_await(&combination(), 1).await })
        };
        let request = tokio::time::timeout(Duration::from_secs(5), launched.recv())
            .await
            .expect("the single slot must have been released")
            .unwrap();
        complete(&registry, &request.correlation_key, "ok");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn callback_before_launch_returns_is_not_lost() {
        let registry = Arc::new(CallbackRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::new(EagerLauncher {
                registry: Arc::clone(&registry),
            }),
            Arc::clone(&registry),
            "https://tunnel.example/callback".into(),
            DEFAULT_MAX_CONCURRENCY,
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.dispatch_and_await(&combination(), 0),
        )
        .await
        .expect("attempt should resolve")
        .unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn duplicate_attempt_is_a_registry_error() {
        let (dispatcher, registry, mut launched) = setup(4, None);

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch_and_await(&combination(), 0).await })
        };
        let request = launched.recv().await.unwrap();

        let err = dispatcher
            .dispatch_and_await(&combination(), 0)
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Registry(RegistryError::AlreadyRegistered(_)));

        complete(&registry, &request.correlation_key, "ok");
        assert!(first.await.unwrap().is_ok());
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        let (dispatcher, _registry, _launched) = setup(0, None);
        assert_eq!(dispatcher.ceiling(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
