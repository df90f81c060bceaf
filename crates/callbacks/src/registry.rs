//! Pending-attempt table keyed by correlation key.
//!
//! [`CallbackRegistry`] is the single owner of every in-flight attempt's
//! callback state. The dispatcher registers a key before launching a
//! remote job and awaits the returned [`Registration`]; the HTTP listener
//! feeds every inbound event through [`CallbackRegistry::deliver`].
//!
//! All mutation happens under one short, non-async critical section, so
//! two events for the same key can never interleave their buffer updates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use runcheck_core::{CorrelationKey, RunResult};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::messages::{CallbackPayload, CallbackStatus, MessageError};

/// What happened to an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Row data or metadata was added to the attempt's buffer.
    Accumulated,
    /// The attempt finished; its awaiting dispatcher has been woken.
    Resolved,
    /// The remote job reported an error; the attempt keeps waiting.
    ErrorReported,
    /// No pending attempt matched the key.
    Ignored,
}

/// Errors raised by registry bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two live attempts derived the same key.
    #[error("Correlation key {0} is already registered")]
    AlreadyRegistered(CorrelationKey),

    /// The registration was removed before a terminal event arrived.
    #[error("Attempt {0} was abandoned before completion")]
    Abandoned(CorrelationKey),
}

struct PendingAttempt {
    buffer: RunResult,
    completion: oneshot::Sender<RunResult>,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<CorrelationKey, PendingAttempt>,
    /// Keys resolved during this process, used to flag late deliveries.
    finished: HashSet<CorrelationKey>,
}

/// Routes callback events to pending attempts.
///
/// Designed to be wrapped in `Arc` and shared between the dispatcher and
/// the HTTP listener.
#[derive(Default)]
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching for events addressed to `key`.
    ///
    /// The returned [`Registration`] deregisters the key when dropped, so
    /// an attempt whose launch fails never leaves a stale entry behind.
    pub fn register(self: &Arc<Self>, key: CorrelationKey) -> Result<Registration, RegistryError> {
        let (completion, receiver) = oneshot::channel();

        let mut state = self.lock();
        if state.pending.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        state.finished.remove(&key);
        state.pending.insert(
            key.clone(),
            PendingAttempt {
                buffer: RunResult::default(),
                completion,
            },
        );
        drop(state);

        tracing::debug!(correlation_key = %key, "Registered pending attempt");

        Ok(Registration {
            key,
            registry: Arc::clone(self),
            receiver: Some(receiver),
        })
    }

    /// Apply one inbound event.
    ///
    /// Events for unknown keys are dropped. Keys that already resolved in
    /// this process are logged as late deliveries.
    pub fn deliver(
        &self,
        key: &CorrelationKey,
        payload: CallbackPayload,
    ) -> Result<DeliveryOutcome, MessageError> {
        let row = payload.row_update()?;

        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(pending) = state.pending.get_mut(key) else {
            if state.finished.contains(key) {
                tracing::warn!(
                    correlation_key = %key,
                    status = ?payload.status,
                    "Callback for an attempt that already completed, ignoring",
                );
            } else {
                tracing::debug!(
                    correlation_key = %key,
                    status = ?payload.status,
                    "Callback matches no pending attempt, ignoring",
                );
            }
            return Ok(DeliveryOutcome::Ignored);
        };

        if let Some(log_url) = payload.log_url {
            pending.buffer.log_url = Some(log_url);
        }
        if let Some(capabilities) = payload.capabilities {
            pending.buffer.capabilities = Some(capabilities);
        }

        match (payload.status, row) {
            (CallbackStatus::Error, row) => {
                if let Some(row) = row {
                    pending.buffer.rows.push(row);
                }
                tracing::error!(
                    correlation_key = %key,
                    log_url = pending.buffer.log_url.as_deref().unwrap_or("-"),
                    "Remote job reported an ERROR, still waiting for completion or retry",
                );
                return Ok(DeliveryOutcome::ErrorReported);
            }
            (_, Some(row)) => {
                tracing::trace!(correlation_key = %key, row_id = row.row_id, "Row update");
                pending.buffer.rows.push(row);
                return Ok(DeliveryOutcome::Accumulated);
            }
            (CallbackStatus::RunningPartial, None) => return Ok(DeliveryOutcome::Accumulated),
            (CallbackStatus::Completed, None) => {}
        }

        let Some(pending) = state.pending.remove(key) else {
            return Ok(DeliveryOutcome::Ignored);
        };
        state.finished.insert(key.clone());
        drop(guard);

        let rows = pending.buffer.rows.len();
        if pending.completion.send(pending.buffer).is_err() {
            tracing::warn!(correlation_key = %key, "Attempt resolved but nobody was waiting");
        } else {
            tracing::info!(correlation_key = %key, rows, "Attempt completed");
        }
        Ok(DeliveryOutcome::Resolved)
    }

    /// Number of attempts currently awaiting a terminal event.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.lock().pending.contains_key(key)
    }

    fn deregister(&self, key: &CorrelationKey) {
        if self.lock().pending.remove(key).is_some() {
            tracing::debug!(correlation_key = %key, "Deregistered pending attempt");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle for one registered attempt.
///
/// Await [`completion`](Self::completion) for the attempt's result.
/// Dropping the handle removes the key from the registry.
pub struct Registration {
    key: CorrelationKey,
    registry: Arc<CallbackRegistry>,
    receiver: Option<oneshot::Receiver<RunResult>>,
}

impl Registration {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the first terminal `COMPLETED` event.
    pub async fn completion(mut self) -> Result<RunResult, RegistryError> {
        let Some(receiver) = self.receiver.take() else {
            return Err(RegistryError::Abandoned(self.key.clone()));
        };
        receiver
            .await
            .map_err(|_| RegistryError::Abandoned(self.key.clone()))
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.key);
    }
}
