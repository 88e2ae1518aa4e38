//! # redb-backed Restart Files
//!
//! One redb database per stage under the run's output directory, named
//! `restart-<code>.redb`, each with a single table keyed by `(row, col)`.
//!
//! - Every `put` commits its own write transaction, so a reader never
//!   observes a partially written snapshot
//! - redb serializes writers; readers see the last committed value
//! - Explicit restart files are only ever read

use super::{SnapshotStore, check_owner, check_put_owner};
use crate::formats::{snapshot_from_bytes, snapshot_to_bytes};
use crate::plan::StageKind;
use crate::{CohortId, ModelStateSnapshot, TundraError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Table for snapshots: (row, col) -> encoded snapshot bytes
const SNAPSHOTS: TableDefinition<(u32, u32), &[u8]> = TableDefinition::new("snapshots");

fn io_err(e: impl std::fmt::Display) -> TundraError {
    TundraError::IoError(e.to_string())
}

fn key(cohort: CohortId) -> (u32, u32) {
    (cohort.row, cohort.col)
}

/// Read one cohort's snapshot from an open restart database.
fn read_snapshot(
    db: &Database,
    cohort: CohortId,
    origin: &Path,
) -> Result<ModelStateSnapshot, TundraError> {
    let not_found = || {
        TundraError::SnapshotNotFound(format!(
            "{} has no snapshot for cohort {}",
            origin.display(),
            cohort
        ))
    };

    let read_txn = db.begin_read().map_err(io_err)?;
    let table = match read_txn.open_table(SNAPSHOTS) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Err(not_found()),
        Err(e) => return Err(io_err(e)),
    };
    let guard = table.get(key(cohort)).map_err(io_err)?.ok_or_else(not_found)?;
    let state = snapshot_from_bytes(guard.value()).map_err(|e| match e {
        TundraError::SnapshotCorrupt(reason) => {
            TundraError::SnapshotCorrupt(format!("{}: {}", origin.display(), reason))
        }
        other => other,
    })?;
    check_owner(cohort, state)
}

/// Decode one cohort's snapshot from a restart file on disk.
pub fn read_restart_file(path: &Path, cohort: CohortId) -> Result<ModelStateSnapshot, TundraError> {
    let db = open_existing(path)?;
    read_snapshot(&db, cohort, path)
}

/// Cohorts present in a restart file, in row-major order.
pub fn restart_file_cohorts(path: &Path) -> Result<Vec<CohortId>, TundraError> {
    let db = open_existing(path)?;
    let read_txn = db.begin_read().map_err(io_err)?;
    let table = match read_txn.open_table(SNAPSHOTS) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };
    let mut cohorts = Vec::new();
    for entry in table.iter().map_err(io_err)? {
        let (k, _) = entry.map_err(io_err)?;
        let (row, col) = k.value();
        cohorts.push(CohortId::new(row, col));
    }
    Ok(cohorts)
}

fn open_existing(path: &Path) -> Result<Database, TundraError> {
    if !path.is_file() {
        return Err(TundraError::SnapshotNotFound(format!(
            "restart file {} does not exist",
            path.display()
        )));
    }
    Database::open(path).map_err(|e| {
        TundraError::SnapshotCorrupt(format!("cannot open {}: {}", path.display(), e))
    })
}

/// Restart files of one run.
pub struct RedbSnapshotStore {
    dir: PathBuf,
    stages: BTreeMap<StageKind, Database>,
    /// External restart files opened so far; a redb file may only be open
    /// once per process.
    external: Mutex<BTreeMap<PathBuf, Arc<Database>>>,
}

impl std::fmt::Debug for RedbSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSnapshotStore")
            .field("dir", &self.dir)
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RedbSnapshotStore {
    /// Open or create the restart files of the given stages in `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        stages: impl IntoIterator<Item = StageKind>,
    ) -> Result<Self, TundraError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let mut opened = BTreeMap::new();
        for stage in stages {
            let path = dir.join(stage.restart_file_name());
            let db = Database::create(&path).map_err(io_err)?;
            {
                let write_txn = db.begin_write().map_err(io_err)?;
                let _ = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
                write_txn.commit().map_err(io_err)?;
            }
            tracing::debug!("Opened restart file {}", path.display());
            opened.insert(stage, db);
        }

        Ok(Self {
            dir,
            stages: opened,
            external: Mutex::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a stage's restart file.
    #[must_use]
    pub fn restart_path(&self, stage: StageKind) -> PathBuf {
        self.dir.join(stage.restart_file_name())
    }

    fn stage_db(&self, stage: StageKind) -> Result<&Database, TundraError> {
        self.stages.get(&stage).ok_or_else(|| {
            TundraError::SnapshotNotFound(format!("no restart file open for {}", stage))
        })
    }

    /// The stage whose restart file lives at `path`, if any.
    fn own_stage(&self, path: &Path) -> Option<StageKind> {
        let wanted = path.canonicalize().ok()?;
        self.stages.keys().copied().find(|stage| {
            self.restart_path(*stage)
                .canonicalize()
                .is_ok_and(|own| own == wanted)
        })
    }

    fn external_db(&self, path: &Path) -> Result<Arc<Database>, TundraError> {
        let mut cache = self
            .external
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(db) = cache.get(path) {
            return Ok(Arc::clone(db));
        }
        let db = Arc::new(open_existing(path)?);
        tracing::info!("Opened external restart file {}", path.display());
        cache.insert(path.to_path_buf(), Arc::clone(&db));
        Ok(db)
    }
}

impl SnapshotStore for RedbSnapshotStore {
    fn put(
        &self,
        cohort: CohortId,
        stage: StageKind,
        state: &ModelStateSnapshot,
    ) -> Result<(), TundraError> {
        check_put_owner(cohort, state)?;
        let bytes = snapshot_to_bytes(state)?;
        let db = self.stage_db(stage)?;

        let write_txn = db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            table
                .insert(key(cohort), bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        tracing::debug!(
            "Wrote {} snapshot for cohort {} ({} bytes)",
            stage.code(),
            cohort,
            bytes.len()
        );
        Ok(())
    }

    fn fetch(&self, cohort: CohortId, stage: StageKind) -> Result<ModelStateSnapshot, TundraError> {
        read_snapshot(self.stage_db(stage)?, cohort, &self.restart_path(stage))
    }

    fn fetch_external(
        &self,
        cohort: CohortId,
        path: &Path,
    ) -> Result<ModelStateSnapshot, TundraError> {
        if let Some(stage) = self.own_stage(path) {
            return self.fetch(cohort, stage);
        }
        let db = self.external_db(path)?;
        read_snapshot(&db, cohort, path)
    }

    fn contains(&self, cohort: CohortId, stage: StageKind) -> Result<bool, TundraError> {
        let Some(db) = self.stages.get(&stage) else {
            return Ok(false);
        };
        let read_txn = db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(io_err)?;
        Ok(table.get(key(cohort)).map_err(io_err)?.is_some())
    }
}

// =============================================================================
// TESTS
// =============================================================================
