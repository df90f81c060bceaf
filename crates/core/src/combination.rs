//! The logical unit of work that gets repeated and compared.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationKey;
use crate::error::CoreError;

/// One job kind × variant × work item combination.
///
/// Identity is structural equality of the three fields. Combinations are
/// enumerated once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCombination {
    /// Remote workflow that executes the job (e.g. `nvda-test.yml`).
    pub job_kind: String,
    /// Environment variant, typically the browser (e.g. `chrome`).
    pub variant: String,
    /// The work item under test, typically a test plan directory.
    pub work_item: String,
}

impl TestCombination {
    /// Build a combination, rejecting blank fields.
    pub fn new(
        job_kind: impl Into<String>,
        variant: impl Into<String>,
        work_item: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let combination = Self {
            job_kind: job_kind.into(),
            variant: variant.into(),
            work_item: work_item.into(),
        };
        for (field, value) in [
            ("job_kind", &combination.job_kind),
            ("variant", &combination.variant),
            ("work_item", &combination.work_item),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(combination)
    }
}

impl fmt::Display for TestCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.work_item, self.job_kind, self.variant)
    }
}

/// Expand the configured lists into the full set of combinations.
///
/// Ordering follows the declaration order of work items first, then job
/// kinds, then variants. Repeated entries in any list are skipped so that
/// every combination appears exactly once.
///
/// Distinct combinations whose correlation keys would coincide (fields
/// joined by `-` are ambiguous when they contain `-` themselves) are
/// rejected here rather than colliding once attempts are in flight.
pub fn enumerate_combinations(
    work_items: &[String],
    job_kinds: &[String],
    variants: &[String],
) -> Result<Vec<TestCombination>, CoreError> {
    let work_items = dedup_in_order(work_items);
    let job_kinds = dedup_in_order(job_kinds);
    let variants = dedup_in_order(variants);

    let mut combinations = Vec::with_capacity(work_items.len() * job_kinds.len() * variants.len());
    for work_item in &work_items {
        for job_kind in &job_kinds {
            for variant in &variants {
                combinations.push(TestCombination::new(*job_kind, *variant, *work_item)?);
            }
        }
    }

    let mut keys: HashMap<CorrelationKey, &TestCombination> = HashMap::new();
    for combination in &combinations {
        if let Some(existing) = keys.insert(CorrelationKey::new(combination, 0), combination) {
            return Err(CoreError::Validation(format!(
                "combinations \"{existing}\" and \"{combination}\" produce the same correlation key"
            )));
        }
    }
    Ok(combinations)
}

fn dedup_in_order(values: &[String]) -> Vec<&str> {
    let mut seen = Vec::with_capacity(values.len());
    for value in values {
        if !seen.contains(&value.as_str()) {
            seen.push(value.as_str());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert_matches!(
            TestCombination::new("X", " ", "plan1"),
            Err(CoreError::Validation(msg)) if msg.contains("variant")
        );
    }

    #[test]
    fn enumeration_follows_work_item_order() {
        let combos = enumerate_combinations(
            &strings(&["plan2", "plan1"]),
            &strings(&["nvda.yml"]),
            &strings(&["chrome", "firefox"]),
        )
        .unwrap();

        let labels: Vec<String> = combos.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "plan2 / nvda.yml / chrome",
                "plan2 / nvda.yml / firefox",
                "plan1 / nvda.yml / chrome",
                "plan1 / nvda.yml / firefox",
            ]
        );
    }

    #[test]
    fn duplicate_inputs_collapse() {
        let combos = enumerate_combinations(
            &strings(&["plan1", "plan1"]),
            &strings(&["X"]),
            &strings(&["chrome", "chrome"]),
        )
        .unwrap();
        assert_eq!(combos.len(), 1);
    }

    #[test]
    fn ambiguous_correlation_keys_are_rejected() {
        let result = enumerate_combinations(
            &strings(&["a-b", "a"]),
            &strings(&["c", "b-c"]),
            &strings(&["chrome"]),
        );
        assert_matches!(
            result,
            Err(CoreError::Validation(msg)) if msg.contains("same correlation key")
        );
    }

    #[test]
    fn empty_list_yields_no_combinations() {
        let combos = enumerate_combinations(&[], &strings(&["X"]), &strings(&["chrome"])).unwrap();
        assert!(combos.is_empty());
    }
}
