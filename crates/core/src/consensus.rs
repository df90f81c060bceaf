//! Consensus over redundant runs of one test combination.
//!
//! Every attempt of a combination is expected to produce the same
//! responses. [`compare`] picks the most common response per row as the
//! baseline and lists every attempt that disagrees with it.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::run_result::RunResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A completed attempt together with its index within the combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRun {
    pub attempt_index: u32,
    pub result: RunResult,
}

/// An attempt whose value for a row differs from the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub attempt_index: u32,
    /// The attempt's value; empty when the attempt never reported the row.
    pub response_values: Vec<String>,
}

/// Consensus outcome for a single row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowComparison {
    pub row_id: u32,
    pub baseline: Vec<String>,
    pub divergences: Vec<Divergence>,
}

/// Consensus outcome for a whole combination.
///
/// `total_rows` counts every (row, attempt) pair evaluated, so
/// `equal_rows + unequal_rows == total_rows` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub rows: Vec<RowComparison>,
    pub total_rows: usize,
    pub equal_rows: usize,
    pub unequal_rows: usize,
}

impl ComparisonResult {
    /// `true` when no attempt diverged on any row.
    pub fn is_consistent(&self) -> bool {
        self.unequal_rows == 0
    }

    pub fn row(&self, row_id: u32) -> Option<&RowComparison> {
        self.rows.iter().find(|row| row.row_id == row_id)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reduce redundant attempts to a baseline per row plus divergences.
///
/// Rows are emitted in ascending `row_id` order. Attempts are considered in
/// ascending `attempt_index` order regardless of the order they are passed
/// in, which is what makes tie breaking deterministic. Zero attempts, or
/// attempts without rows, produce an empty result with zero totals.
pub fn compare(runs: &[AttemptRun]) -> ComparisonResult {
    let mut ordered: Vec<&AttemptRun> = runs.iter().collect();
    ordered.sort_by_key(|run| run.attempt_index);

    let row_ids: BTreeSet<u32> = ordered
        .iter()
        .flat_map(|run| run.result.rows.iter().map(|row| row.row_id))
        .collect();

    let mut comparison = ComparisonResult::default();

    for row_id in row_ids {
        let values: Vec<(u32, Option<&[String]>)> = ordered
            .iter()
            .map(|run| (run.attempt_index, run.result.latest(row_id)))
            .collect();

        // The row id came from at least one attempt, so a mode exists.
        let Some(baseline) = mode(values.iter().filter_map(|(_, value)| *value)) else {
            continue;
        };

        let mut divergences = Vec::new();
        for (attempt_index, value) in values.iter().copied() {
            comparison.total_rows += 1;
            match value {
                Some(value) if value == baseline => comparison.equal_rows += 1,
                _ => divergences.push(Divergence {
                    attempt_index,
                    response_values: value.map(<[String]>::to_vec).unwrap_or_default(),
                }),
            }
        }

        comparison.rows.push(RowComparison {
            row_id,
            baseline: baseline.to_vec(),
            divergences,
        });
    }

    comparison.unequal_rows = comparison.total_rows - comparison.equal_rows;
    comparison
}

/// Most frequent value; ties go to the value seen first.
fn mode<'a>(values: impl IntoIterator<Item = &'a [String]>) -> Option<&'a [String]> {
    let mut counts: IndexMap<&'a [String], usize> = IndexMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }

    let mut best: Option<(&'a [String], usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
