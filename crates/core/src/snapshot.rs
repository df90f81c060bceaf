//! Flat snapshot file holding a finished run.
//!
//! The snapshot is pretty-printed JSON so it can be inspected by hand and
//! fed back into the report step without re-running any remote jobs.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::report::RunSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to access snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {path} is not valid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Write `snapshot` to `path`, replacing any existing file.
///
/// The content is written to a sibling temporary file first and renamed
/// into place, so a crash mid-write never leaves a truncated snapshot.
pub fn save(path: &Path, snapshot: &RunSnapshot) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let file = fs::File::create(&tmp_path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|source| SnapshotError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

/// Read a snapshot previously written by [`save`].
pub fn load(path: &Path) -> Result<RunSnapshot, SnapshotError> {
    let file = fs::File::open(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| SnapshotError::Format {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::combination::TestCombination;
    use crate::consensus::{compare, AttemptRun};
    use crate::report::{AttemptOutcome, AttemptRecord, CombinationReport, RerunRecord};
    use crate::run_result::{Capabilities, RowResult, RunResult};

    fn sample_snapshot() -> RunSnapshot {
        let combination = TestCombination::new("X", "chrome", "plan1").unwrap();
        let runs: Vec<AttemptRun> = ["alpha", "alpha", "beta"]
            .iter()
            .enumerate()
            .map(|(i, value)| AttemptRun {
                attempt_index: i as u32,
                result: RunResult {
                    rows: vec![RowResult {
                        row_id: 1,
                        response_values: vec![value.to_string()],
                    }],
                    log_url: Some(format!("https://ci.example/runs/{i}")),
                    capabilities: Some(Capabilities {
                        at_name: Some("NVDA".into()),
                        browser_name: Some("chrome".into()),
                        ..Default::default()
                    }),
                },
            })
            .collect();

        let attempts = runs
            .iter()
            .map(|run| AttemptRecord {
                attempt_index: run.attempt_index,
                correlation_key: format!("plan1-X-chrome-{}", run.attempt_index),
                outcome: AttemptOutcome::Completed { rows: 1 },
                log_url: run.result.log_url.clone(),
                capabilities: run.result.capabilities.clone(),
            })
            .chain(std::iter::once(AttemptRecord {
                attempt_index: 3,
                correlation_key: "plan1-X-chrome-3".into(),
                outcome: AttemptOutcome::DispatchFailed {
                    reason: "HTTP 422".into(),
                },
                log_url: None,
                capabilities: None,
            }))
            .collect();

        let mut snapshot = RunSnapshot::new(
            4,
            vec![CombinationReport {
                combination,
                comparison: compare(&runs),
                attempts,
            }],
        );
        snapshot.reruns.push(RerunRecord {
            job_id: 77,
            job_kind: "X".into(),
            url: "https://ci.example/runs/77".into(),
        });
        snapshot
    }

    #[test]
    fn save_then_load_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");
        let snapshot = sample_snapshot();

        save(&path, &snapshot).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded, snapshot);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        save(&path, &RunSnapshot::new(1, Vec::new())).unwrap();
        let snapshot = sample_snapshot();
        save(&path, &snapshot).unwrap();

        assert_eq!(load(&path).unwrap(), snapshot);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            load(&dir.path().join("absent.json")),
            Err(SnapshotError::Io { .. })
        );
    }

    #[test]
    fn garbage_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, "{not json").unwrap();
        assert_matches!(load(&path), Err(SnapshotError::Format { .. }));
    }
}
