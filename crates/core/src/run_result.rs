//! Finalized output of a single attempt.

use serde::{Deserialize, Serialize};

/// Assistive technology / browser / platform versions reported by the
/// remote runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
}

/// One reported row: the smallest comparable unit of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub row_id: u32,
    /// Ordered response strings. Compared only by equality.
    pub response_values: Vec<String>,
}

/// Everything an attempt reported before its terminal callback.
///
/// Rows are kept in arrival order. A row id may appear more than once;
/// readers must treat the last entry for a given id as authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub rows: Vec<RowResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl RunResult {
    /// Latest value reported for `row_id`, if any.
    pub fn latest(&self, row_id: u32) -> Option<&[String]> {
        self.rows
            .iter()
            .rev()
            .find(|row| row.row_id == row_id)
            .map(|row| row.response_values.as_slice())
    }

    /// Number of distinct row ids reported.
    pub fn distinct_rows(&self) -> usize {
        let mut ids: Vec<u32> = self.rows.iter().map(|row| row.row_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_id: u32, values: &[&str]) -> RowResult {
        RowResult {
            row_id,
            response_values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn last_write_wins_for_repeated_rows() {
        let result = RunResult {
            rows: vec![row(1, &["a"]), row(2, &["b"]), row(1, &["c"])],
            ..Default::default()
        };
        assert_eq!(result.latest(1), Some(&["c".to_string()][..]));
        assert_eq!(result.latest(2), Some(&["b".to_string()][..]));
        assert_eq!(result.latest(3), None);
        assert_eq!(result.distinct_rows(), 2);
    }

    #[test]
    fn capabilities_use_camel_case_on_the_wire() {
        let caps: Capabilities = serde_json::from_value(serde_json::json!({
            "atName": "NVDA",
            "atVersion": "2024.1",
            "browserName": "chrome",
        }))
        .unwrap();
        assert_eq!(caps.at_name.as_deref(), Some("NVDA"));
        assert_eq!(caps.browser_name.as_deref(), Some("chrome"));
        assert!(caps.platform_name.is_none());
    }
}
