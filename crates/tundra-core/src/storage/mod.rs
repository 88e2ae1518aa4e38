//! # State Snapshot Store
//!
//! Snapshots keyed by (cohort, stage kind). The most recent `put` is the
//! visible value; there is no versioning beyond the active run.
//!
//! Stores are shared by every worker of a batch, so they take `&self` and
//! must keep distinct cohorts independent. A `put` returns only once the
//! snapshot is visible to a following `fetch` of the same cohort.

mod memory;
mod redb_store;

pub use memory::MemorySnapshotStore;
pub use redb_store::{RedbSnapshotStore, read_restart_file, restart_file_cohorts};

use crate::plan::{RestartSource, StageKind};
use crate::{CohortId, ModelStateSnapshot, TundraError};
use std::path::Path;

/// Backend for stage-boundary checkpoints.
pub trait SnapshotStore: Send + Sync {
    /// Persist the terminal state of `stage` for `cohort`, superseding any
    /// earlier snapshot under the same key.
    fn put(
        &self,
        cohort: CohortId,
        stage: StageKind,
        state: &ModelStateSnapshot,
    ) -> Result<(), TundraError>;

    /// Load the snapshot a stage produced for a cohort.
    fn fetch(&self, cohort: CohortId, stage: StageKind) -> Result<ModelStateSnapshot, TundraError>;

    /// Load a cohort's snapshot from a named external restart location.
    fn fetch_external(
        &self,
        cohort: CohortId,
        path: &Path,
    ) -> Result<ModelStateSnapshot, TundraError>;

    fn contains(&self, cohort: CohortId, stage: StageKind) -> Result<bool, TundraError>;

    /// Resolve a stage's restart source.
    ///
    /// `Chained` loads the terminal snapshot of `predecessor` and fails with
    /// `SnapshotNotFound` when there is no predecessor or it has not run for
    /// this cohort. `Explicit` loads from the named location only.
    fn get(
        &self,
        cohort: CohortId,
        predecessor: Option<StageKind>,
        source: &RestartSource,
    ) -> Result<ModelStateSnapshot, TundraError> {
        match source {
            RestartSource::Chained => match predecessor {
                Some(stage) => self.fetch(cohort, stage),
                None => Err(TundraError::SnapshotNotFound(format!(
                    "no preceding stage for cohort {}",
                    cohort
                ))),
            },
            RestartSource::Explicit(path) => self.fetch_external(cohort, path),
        }
    }
}

/// Refuse a snapshot filed under another cohort's key.
pub(crate) fn check_owner(
    cohort: CohortId,
    state: ModelStateSnapshot,
) -> Result<ModelStateSnapshot, TundraError> {
    if state.cohort != cohort {
        return Err(TundraError::SnapshotCorrupt(format!(
            "snapshot stored for cohort {} belongs to cohort {}",
            cohort, state.cohort
        )));
    }
    Ok(state)
}

pub(crate) fn check_put_owner(
    cohort: CohortId,
    state: &ModelStateSnapshot,
) -> Result<(), TundraError> {
    if state.cohort != cohort {
        return Err(TundraError::SerializationError(format!(
            "cannot store state of cohort {} under cohort {}",
            state.cohort, cohort
        )));
    }
    Ok(())
}
