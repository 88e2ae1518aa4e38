//! In-memory snapshot store.
//!
//! Holds encoded bytes rather than live values so that every round trip
//! goes through the same codec as the on-disk store.

use super::{SnapshotStore, check_owner, check_put_owner};
use crate::formats::{snapshot_from_bytes, snapshot_to_bytes};
use crate::plan::StageKind;
use crate::{CohortId, ModelStateSnapshot, TundraError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<BTreeMap<(CohortId, StageKind), Vec<u8>>>,
    /// Stand-ins for external restart files, keyed by path.
    external: RwLock<BTreeMap<PathBuf, BTreeMap<CohortId, Vec<u8>>>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot under an external restart path.
    pub fn insert_external(
        &self,
        path: impl Into<PathBuf>,
        state: &ModelStateSnapshot,
    ) -> Result<(), TundraError> {
        let bytes = snapshot_to_bytes(state)?;
        self.external
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.into())
            .or_default()
            .insert(state.cohort, bytes);
        Ok(())
    }

    /// Overwrite stored bytes directly, bypassing the codec.
    pub fn insert_raw(&self, cohort: CohortId, stage: StageKind, bytes: Vec<u8>) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((cohort, stage), bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(
        &self,
        cohort: CohortId,
        stage: StageKind,
        state: &ModelStateSnapshot,
    ) -> Result<(), TundraError> {
        check_put_owner(cohort, state)?;
        let bytes = snapshot_to_bytes(state)?;
        self.insert_raw(cohort, stage, bytes);
        Ok(())
    }

    fn fetch(&self, cohort: CohortId, stage: StageKind) -> Result<ModelStateSnapshot, TundraError> {
        let guard = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let bytes = guard.get(&(cohort, stage)).ok_or_else(|| {
            TundraError::SnapshotNotFound(format!("{} for cohort {}", stage, cohort))
        })?;
        check_owner(cohort, snapshot_from_bytes(bytes)?)
    }

    fn fetch_external(
        &self,
        cohort: CohortId,
        path: &Path,
    ) -> Result<ModelStateSnapshot, TundraError> {
        let guard = self
            .external
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let bytes = guard
            .get(path)
            .and_then(|file| file.get(&cohort))
            .ok_or_else(|| {
                TundraError::SnapshotNotFound(format!(
                    "{} has no snapshot for cohort {}",
                    path.display(),
                    cohort
                ))
            })?;
        check_owner(cohort, snapshot_from_bytes(bytes)?)
    }

    fn contains(&self, cohort: CohortId, stage: StageKind) -> Result<bool, TundraError> {
        Ok(self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(cohort, stage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::RestartSource;

    fn state(row: u32) -> ModelStateSnapshot {
        ModelStateSnapshot::cold_start(CohortId::new(row, 0), 2)
    }

    #[test]
    fn put_then_fetch() {
        let store = MemorySnapshotStore::new();
        let s = state(1);
        store
            .put(s.cohort, StageKind::Equilibrium, &s)
            .expect("put");
        assert!(store.contains(s.cohort, StageKind::Equilibrium).expect("contains"));
        assert_eq!(store.fetch(s.cohort, StageKind::Equilibrium).expect("fetch"), s);
        assert!(matches!(
            store.fetch(s.cohort, StageKind::SpinUp),
            Err(TundraError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn latest_put_wins() {
        let store = MemorySnapshotStore::new();
        let mut s = state(1);
        store.put(s.cohort, StageKind::SpinUp, &s).expect("put");
        s.disturbance.years_since_fire = 42;
        store.put(s.cohort, StageKind::SpinUp, &s).expect("put");
        let back = store.fetch(s.cohort, StageKind::SpinUp).expect("fetch");
        assert_eq!(back.disturbance.years_since_fire, 42);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn chained_without_predecessor_not_found() {
        let store = MemorySnapshotStore::new();
        let result = store.get(CohortId::new(0, 0), None, &RestartSource::Chained);
        assert!(matches!(result, Err(TundraError::SnapshotNotFound(_))));
    }

    #[test]
    fn explicit_source_ignores_chain() {
        let store = MemorySnapshotStore::new();
        let chained = state(4);
        let mut external = state(4);
        external.community_type = 9;
        store
            .put(chained.cohort, StageKind::PreRun, &chained)
            .expect("put");
        store
            .insert_external("/ext/restart-eq.redb", &external)
            .expect("insert");

        let got = store
            .get(
                chained.cohort,
                Some(StageKind::PreRun),
                &RestartSource::Explicit("/ext/restart-eq.redb".into()),
            )
            .expect("get");
        assert_eq!(got.community_type, 9);
    }

    #[test]
    fn corrupt_bytes_and_wrong_owner() {
        let store = MemorySnapshotStore::new();
        let cohort = CohortId::new(2, 2);
        store.insert_raw(cohort, StageKind::Transient, vec![1, 2, 3]);
        assert!(matches!(
            store.fetch(cohort, StageKind::Transient),
            Err(TundraError::SnapshotCorrupt(_))
        ));

        let other = state(7);
        let bytes = snapshot_to_bytes(&other).expect("encode");
        store.insert_raw(cohort, StageKind::Scenario, bytes);
        assert!(matches!(
            store.fetch(cohort, StageKind::Scenario),
            Err(TundraError::SnapshotCorrupt(_))
        ));

        assert!(store.put(cohort, StageKind::Scenario, &other).is_err());
    }
}
