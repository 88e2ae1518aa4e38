//! Run status grid (`run_status.json`) and the append-only failure log
//! (`fail_log.txt`).

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tundra_core::{RunReport, RunStatus, TundraError};

pub const RUN_STATUS_FILE: &str = "run_status.json";
pub const FAIL_LOG_FILE: &str = "fail_log.txt";

#[derive(Debug, Serialize)]
pub struct CohortStatus {
    pub row: u32,
    pub col: u32,
    pub status: String,
    pub code: i32,
    pub completed: Vec<&'static str>,
    pub failed_stage: Option<&'static str>,
    pub error: Option<String>,
    pub total_runtime: f64,
}

#[derive(Debug, Serialize)]
pub struct StatusFile {
    pub run_name: String,
    pub rows: usize,
    pub cols: usize,
    /// Status code of every cell, row-major.
    pub run_status: Vec<Vec<i32>>,
    pub cohorts: Vec<CohortStatus>,
    pub tally: Vec<(String, usize)>,
}

impl StatusFile {
    #[must_use]
    pub fn new(run_name: &str, dims: (usize, usize), report: &RunReport) -> Self {
        let (rows, cols) = dims;
        let mut grid = vec![vec![RunStatus::Masked.code(); cols]; rows];
        let mut cohorts = Vec::with_capacity(report.cohorts.len());
        for r in &report.cohorts {
            let status = RunStatus::of(r);
            if let Some(cell) = grid
                .get_mut(r.cohort.row as usize)
                .and_then(|row| row.get_mut(r.cohort.col as usize))
            {
                *cell = status.code();
            }
            let failure = r.failure();
            cohorts.push(CohortStatus {
                row: r.cohort.row,
                col: r.cohort.col,
                status: status.to_string(),
                code: status.code(),
                completed: r.completed().map(|k| k.code()).collect(),
                failed_stage: failure.map(|(k, _)| k.code()),
                error: failure.map(|(_, e)| e.to_string()),
                total_runtime: r.elapsed.as_secs_f64(),
            });
        }
        Self {
            run_name: run_name.to_string(),
            rows,
            cols,
            run_status: grid,
            cohorts,
            tally: report
                .tally()
                .into_iter()
                .map(|(s, n)| (s.to_string(), n))
                .collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), TundraError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| TundraError::SerializationError(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| TundraError::IoError(format!("{}: {}", path.display(), e)))
    }
}

/// Append one line per failed cohort. Returns the number of lines written.
pub fn append_fail_log(path: &Path, report: &RunReport) -> Result<usize, TundraError> {
    let lines: Vec<String> = report
        .failures()
        .map(|(cohort, stage, e)| {
            format!(
                "FAILURE at cell (row, col): ({}, {}) in {}: {}",
                cohort.row,
                cohort.col,
                stage.code(),
                e
            )
        })
        .collect();
    if lines.is_empty() {
        return Ok(0);
    }
    let io_err = |e: std::io::Error| TundraError::IoError(format!("{}: {}", path.display(), e));
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    for line in &lines {
        writeln!(file, "{}", line).map_err(io_err)?;
    }
    Ok(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tundra_core::{
        CohortId, CohortReport, SequencerState, StageKind, StageOutcome, StageStatus,
    };

    fn report() -> RunReport {
        let ok = CohortReport {
            cohort: CohortId::new(0, 0),
            outcomes: vec![StageOutcome {
                stage: StageKind::Equilibrium,
                status: StageStatus::Skipped(tundra_core::SkipReason::AlreadyComplete),
            }],
            states: vec![SequencerState::Idle, SequencerState::Done],
            elapsed: Duration::from_millis(1500),
        };
        let failed = CohortReport {
            cohort: CohortId::new(1, 1),
            outcomes: vec![StageOutcome {
                stage: StageKind::Equilibrium,
                status: StageStatus::Failed(TundraError::SnapshotCorrupt("digest".into())),
            }],
            states: vec![SequencerState::Idle, SequencerState::Failed],
            elapsed: Duration::ZERO,
        };
        RunReport {
            cohorts: vec![ok, failed],
            masked: vec![CohortId::new(0, 1), CohortId::new(1, 0)],
        }
    }

    #[test]
    fn grid_carries_codes() {
        let status = StatusFile::new("test", (2, 2), &report());
        assert_eq!(status.run_status, vec![vec![100, 0], vec![0, -100]]);
        assert_eq!(status.cohorts[1].failed_stage, Some("eq"));
        assert!((status.cohorts[0].total_runtime - 1.5).abs() < 1e-9);
    }

    #[test]
    fn fail_log_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(FAIL_LOG_FILE);
        assert_eq!(append_fail_log(&path, &report()).expect("log"), 1);
        assert_eq!(append_fail_log(&path, &report()).expect("log"), 1);
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("(1, 1) in eq"));
    }
}
