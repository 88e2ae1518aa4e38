//! # Output Contract
//!
//! The sequencer hands per-timestep aggregates to an [`OutputSink`] tagged
//! with (cohort, stage, year, month-or-none). Variable selection and file
//! formats belong to the sink.

use crate::plan::StageKind;
use crate::state::Aggregates;
use crate::{CohortId, TundraError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// One delivered value set. `month` is `None` for a yearly record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub cohort: CohortId,
    pub stage: StageKind,
    pub year: u32,
    pub month: Option<u8>,
    pub values: Aggregates,
}

/// Output writer collaborator. Shared by every worker of a batch.
pub trait OutputSink: Send + Sync {
    fn record(&self, record: &OutputRecord) -> Result<(), TundraError>;

    /// Called once after the batch has finished.
    fn flush(&self) -> Result<(), TundraError> {
        Ok(())
    }
}

/// Which stages produce output, and at what resolution.
///
/// The pre-run is a spin-up of the thermal state only and is never written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPolicy {
    pub monthly: bool,
    stages: BTreeSet<StageKind>,
}

impl OutputPolicy {
    #[must_use]
    pub fn new(monthly: bool, stages: impl IntoIterator<Item = StageKind>) -> Self {
        Self {
            monthly,
            stages: stages
                .into_iter()
                .filter(|s| *s != StageKind::PreRun)
                .collect(),
        }
    }

    /// No output at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn writes(&self, stage: StageKind) -> bool {
        self.stages.contains(&stage)
    }

    /// Stages that are written, in execution order.
    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().copied()
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn record(&self, _record: &OutputRecord) -> Result<(), TundraError> {
        Ok(())
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<OutputRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<OutputRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records of one cohort, in the order they were produced.
    #[must_use]
    pub fn cohort_records(&self, cohort: CohortId) -> Vec<OutputRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.cohort == cohort)
            .cloned()
            .collect()
    }
}

impl OutputSink for MemorySink {
    fn record(&self, record: &OutputRecord) -> Result<(), TundraError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
