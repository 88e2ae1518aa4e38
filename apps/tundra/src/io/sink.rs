//! JSON-lines output writer: one `output-<code>.jsonl` per written stage.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tundra_core::{OutputRecord, OutputSink, StageKind, TundraError};

fn io_err(path: &Path, e: std::io::Error) -> TundraError {
    TundraError::IoError(format!("{}: {}", path.display(), e))
}

#[must_use]
pub fn output_file_name(stage: StageKind) -> String {
    format!("output-{}.jsonl", stage.code())
}

pub struct JsonLinesSink {
    files: BTreeMap<StageKind, (PathBuf, Mutex<BufWriter<File>>)>,
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("stages", &self.files.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    /// Open one file per stage in `dir`. With `append`, records of a
    /// resumed run are added to the existing files.
    pub fn create(
        dir: &Path,
        stages: impl IntoIterator<Item = StageKind>,
        append: bool,
    ) -> Result<Self, TundraError> {
        let mut files = BTreeMap::new();
        for stage in stages {
            let path = dir.join(output_file_name(stage));
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&path)
                .map_err(|e| io_err(&path, e))?;
            tracing::debug!("Writing {} output to {}", stage.code(), path.display());
            files.insert(stage, (path, Mutex::new(BufWriter::new(file))));
        }
        Ok(Self { files })
    }
}

impl OutputSink for JsonLinesSink {
    fn record(&self, record: &OutputRecord) -> Result<(), TundraError> {
        let (path, writer) = self.files.get(&record.stage).ok_or_else(|| {
            TundraError::IoError(format!("no output file open for {}", record.stage))
        })?;
        let line = serde_json::to_string(record)
            .map_err(|e| TundraError::SerializationError(e.to_string()))?;
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line).map_err(|e| io_err(path, e))
    }

    fn flush(&self) -> Result<(), TundraError> {
        for (path, writer) in self.files.values() {
            writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .flush()
                .map_err(|e| io_err(path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tundra_core::{Aggregates, CohortId};

    fn record(stage: StageKind, year: u32) -> OutputRecord {
        OutputRecord {
            cohort: CohortId::new(0, 1),
            stage,
            year,
            month: None,
            values: Aggregates::default(),
        }
    }

    #[test]
    fn one_line_per_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonLinesSink::create(dir.path(), [StageKind::Transient], false).expect("sink");
        sink.record(&record(StageKind::Transient, 0)).expect("record");
        sink.record(&record(StageKind::Transient, 1)).expect("record");
        sink.flush().expect("flush");

        let text = std::fs::read_to_string(dir.path().join("output-tr.jsonl")).expect("read");
        let lines: Vec<OutputRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();
        assert_eq!(lines, vec![record(StageKind::Transient, 0), record(StageKind::Transient, 1)]);
    }

    #[test]
    fn unopened_stage_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonLinesSink::create(dir.path(), [StageKind::Scenario], false).expect("sink");
        assert!(sink.record(&record(StageKind::Transient, 0)).is_err());
    }

    #[test]
    fn append_keeps_earlier_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let sink = JsonLinesSink::create(dir.path(), [StageKind::Scenario], false).expect("sink");
            sink.record(&record(StageKind::Scenario, 0)).expect("record");
            sink.flush().expect("flush");
        }
        let sink = JsonLinesSink::create(dir.path(), [StageKind::Scenario], true).expect("sink");
        sink.record(&record(StageKind::Scenario, 1)).expect("record");
        sink.flush().expect("flush");

        let text = std::fs::read_to_string(dir.path().join("output-sc.jsonl")).expect("read");
        assert_eq!(text.lines().count(), 2);
    }
}
