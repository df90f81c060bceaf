//! Per-combination orchestration: dispatch every attempt, collect the
//! results that come back, and reduce them to one comparison record.

use std::sync::Arc;

use futures::future::join_all;
use runcheck_core::{
    compare, AttemptOutcome, AttemptRecord, AttemptRun, CombinationReport, CorrelationKey,
    TestCombination,
};
use runcheck_dispatch::{DispatchError, Dispatcher};

pub struct Aggregator {
    dispatcher: Arc<Dispatcher>,
    attempts: u32,
}

impl Aggregator {
    pub fn new(dispatcher: Arc<Dispatcher>, attempts: u32) -> Self {
        Self {
            dispatcher,
            attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run every attempt of `combination` and compare the results.
    ///
    /// Attempts queue for dispatch slots in index order and may complete in
    /// any order. A failed attempt is recorded but contributes no rows, so
    /// the report always exists even when every attempt failed.
    pub async fn run_combination(&self, combination: &TestCombination) -> CombinationReport {
        let outcomes = join_all(
            (0..self.attempts).map(|attempt| self.dispatcher.dispatch_and_await(combination, attempt)),
        )
        .await;

        let mut runs = Vec::new();
        let mut attempts = Vec::with_capacity(outcomes.len());

        for (attempt_index, outcome) in (0..self.attempts).zip(outcomes) {
            let correlation_key = CorrelationKey::new(combination, attempt_index).to_string();
            match outcome {
                Ok(result) => {
                    attempts.push(AttemptRecord {
                        attempt_index,
                        correlation_key,
                        outcome: AttemptOutcome::Completed {
                            rows: result.distinct_rows(),
                        },
                        log_url: result.log_url.clone(),
                        capabilities: result.capabilities.clone(),
                    });
                    runs.push(AttemptRun {
                        attempt_index,
                        result,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        work_item = %combination.work_item,
                        job_kind = %combination.job_kind,
                        variant = %combination.variant,
                        attempt = attempt_index,
                        error = %e,
                        "Attempt produced no result",
                    );
                    attempts.push(AttemptRecord {
                        attempt_index,
                        correlation_key,
                        outcome: failure_outcome(&e),
                        log_url: None,
                        capabilities: None,
                    });
                }
            }
        }

        let comparison = compare(&runs);

        tracing::info!(
            combination = %combination,
            completed = runs.len(),
            attempts = self.attempts,
            total_rows = comparison.total_rows,
            unequal_rows = comparison.unequal_rows,
            "Combination finished",
        );

        CombinationReport {
            combination: combination.clone(),
            comparison,
            attempts,
        }
    }

    /// Run all combinations concurrently, bounded only by the dispatcher's
    /// ceiling. Reports come back in the order of `combinations`.
    pub async fn run_all(&self, combinations: &[TestCombination]) -> Vec<CombinationReport> {
        tracing::info!(
            combinations = combinations.len(),
            attempts = self.attempts,
            ceiling = self.dispatcher.ceiling(),
            "Dispatching batch",
        );
        join_all(combinations.iter().map(|c| self.run_combination(c))).await
    }
}

/// Only a rejected launch counts as a dispatch failure; anything else
/// means the attempt was dropped on this side.
fn failure_outcome(error: &DispatchError) -> AttemptOutcome {
    let reason = error.to_string();
    match error {
        DispatchError::AttemptDispatchFailed { .. } => AttemptOutcome::DispatchFailed { reason },
        DispatchError::Registry(_) | DispatchError::Closed => AttemptOutcome::Abandoned { reason },
    }
}
