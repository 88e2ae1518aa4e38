//! # Core Type Definitions
//!
//! Identifiers and the error taxonomy shared by every component:
//! - Grid identifiers (`CohortId`)
//! - Time addressing inside a stage (`TimeStep`)
//! - Error types (`TundraError`)
//!
//! ## Error Scope
//!
//! Configuration errors are run-scoped: they abort before any cohort starts.
//! Every other variant is raised while sequencing one cohort and is recorded
//! in that cohort's report without touching its siblings.

use crate::plan::StageKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// GRID IDENTIFIERS
// =============================================================================

/// One grid cell. A cohort is the simulated state and history of one cell.
///
/// Ordered row-major so that `BTreeMap<CohortId, _>` iterates the grid in
/// the same order as the run mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CohortId {
    pub row: u32,
    pub col: u32,
}

impl CohortId {
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

// =============================================================================
// TIME ADDRESSING
// =============================================================================

/// A monthly time step inside one stage of one cohort.
///
/// `year` counts from 0 at the start of the stage; `month` is 0..12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStep {
    pub cohort: CohortId,
    pub stage: StageKind,
    pub year: u32,
    pub month: u8,
}

impl TimeStep {
    /// Whether this is the last month of the simulated year.
    #[must_use]
    pub const fn is_year_end(&self) -> bool {
        self.month as usize + 1 == crate::primitives::MONTHS_PER_YEAR
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while resolving or executing a run.
///
/// - No silent failures
/// - Use `Result<T, TundraError>` for fallible operations
/// - The controller never panics; cohort failures are data in the report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TundraError {
    /// Stage settings are malformed or contradictory.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No snapshot exists for the requested location.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// A snapshot was found but failed structural or integrity checks.
    #[error("Snapshot corrupt: {0}")]
    SnapshotCorrupt(String),

    /// A stage could not obtain an initial state.
    #[error("Initialization failed for cohort {cohort} in {stage}: {reason}")]
    Initialization {
        cohort: CohortId,
        stage: StageKind,
        reason: String,
    },

    /// The process kernel failed during a time step.
    #[error("Kernel failure for cohort {cohort} in {stage} at year {year}, month {month}: {message}")]
    Kernel {
        cohort: CohortId,
        stage: StageKind,
        year: u32,
        month: u8,
        message: String,
    },

    /// The per-cell wall-clock limit was exceeded.
    #[error("Cell time limit of {limit_secs}s exceeded for cohort {cohort} in {stage}")]
    TimeLimitExceeded {
        cohort: CohortId,
        stage: StageKind,
        limit_secs: u64,
    },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The worker pool could not be created.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl TundraError {
    /// Whether the error only concerns the cohort it was raised for.
    #[must_use]
    pub fn is_cohort_scoped(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::WorkerPool(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================
