//! Run summary written to the log after a live run or a snapshot replay.

use runcheck_core::{AttemptOutcome, RunSnapshot};

/// Totals across every combination of a snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub combinations: usize,
    pub inconsistent: usize,
    pub divergences: usize,
    pub dispatch_failures: usize,
    pub abandoned: usize,
    pub reruns: usize,
}

impl RunSummary {
    pub fn of(snapshot: &RunSnapshot) -> Self {
        let divergences = snapshot
            .combinations
            .iter()
            .flat_map(|report| &report.comparison.rows)
            .map(|row| row.divergences.len())
            .sum();
        let attempts = || snapshot.combinations.iter().flat_map(|report| &report.attempts);
        let dispatch_failures = attempts()
            .filter(|a| matches!(a.outcome, AttemptOutcome::DispatchFailed { .. }))
            .count();
        let abandoned = attempts()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Abandoned { .. }))
            .count();

        Self {
            combinations: snapshot.combinations.len(),
            inconsistent: snapshot.inconsistent_count(),
            divergences,
            dispatch_failures,
            abandoned,
            reruns: snapshot.reruns.len(),
        }
    }
}

/// Log one line per combination, one per divergence and one per re-run.
pub fn log_summary(snapshot: &RunSnapshot) -> RunSummary {
    for report in &snapshot.combinations {
        let comparison = &report.comparison;
        tracing::info!(
            combination = %report.combination,
            completed = report.completed_attempts(),
            attempts = report.attempts.len(),
            total_rows = comparison.total_rows,
            equal_rows = comparison.equal_rows,
            unequal_rows = comparison.unequal_rows,
            "Combination result",
        );

        for row in &comparison.rows {
            for divergence in &row.divergences {
                let log_url = report
                    .attempts
                    .iter()
                    .find(|a| a.attempt_index == divergence.attempt_index)
                    .and_then(|a| a.log_url.as_deref())
                    .unwrap_or("-");
                tracing::warn!(
                    combination = %report.combination,
                    row_id = row.row_id,
                    attempt = divergence.attempt_index,
                    baseline = ?row.baseline,
                    response_values = ?divergence.response_values,
                    log_url,
                    "Attempt diverges from baseline",
                );
            }
        }
    }

    for rerun in &snapshot.reruns {
        tracing::info!(
            job_id = rerun.job_id,
            job_kind = %rerun.job_kind,
            url = %rerun.url,
            "Remote job was re-run during this batch",
        );
    }

    let summary = RunSummary::of(snapshot);
    tracing::info!(
        generated_at = %snapshot.generated_at,
        combinations = summary.combinations,
        inconsistent = summary.inconsistent,
        divergences = summary.divergences,
        dispatch_failures = summary.dispatch_failures,
        abandoned = summary.abandoned,
        reruns = summary.reruns,
        "Run summary",
    );
    summary
}
