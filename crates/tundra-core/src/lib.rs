//! # tundra-core
//!
//! Stage sequencing and state continuity for a gridded, multi-stage
//! terrestrial ecosystem model - THE CONTROLLER.
//!
//! This crate decides which simulation stages run, in what order, for how
//! many years and with which subsystems enabled, and carries each grid
//! cell's complete state across stage boundaries through restart
//! snapshots.
//!
//! ## Components
//!
//! - `plan` → Stage Configuration Resolver (`StageSettings` → `RunPlan`)
//! - `storage` + `formats` → State Snapshot Store and its byte format
//! - `stability` → early termination of equilibrium-type stages
//! - `sequencer` → per-cohort run controller
//! - `batch` + `grid` → run mask and the worker pool
//! - `kernel`, `output`, `calibration` → collaborator seams
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Cohorts share no mutable state while running
//! - Run-wide signalling is an explicit `RunContext`, never a global
//! - Process kernels are reached through a trait and must be pure

// =============================================================================
// MODULES
// =============================================================================

pub mod batch;
pub mod calibration;
pub mod control;
pub mod formats;
pub mod grid;
pub mod kernel;
pub mod output;
pub mod plan;
pub mod primitives;
pub mod sequencer;
pub mod stability;
pub mod state;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{CohortId, TimeStep, TundraError};

// =============================================================================
// RE-EXPORTS: Planning
// =============================================================================

pub use plan::{
    NitrogenCoupling, RawConvergence, RawModules, RawStage, RestartMode, RestartSource, RunPlan,
    StageDescriptor, StageKind, StageSettings, SubsystemToggles, ToggleFlags,
};
pub use stability::{ConvergenceCriteria, Decision, StabilityEvaluator};

// =============================================================================
// RE-EXPORTS: State and Snapshots
// =============================================================================

pub use formats::{SnapshotHeader, snapshot_from_bytes, snapshot_to_bytes};
pub use state::{Aggregates, ModelStateSnapshot};
pub use storage::{MemorySnapshotStore, RedbSnapshotStore, SnapshotStore};

// =============================================================================
// RE-EXPORTS: Execution
// =============================================================================

pub use batch::{BatchRunner, RunReport, RunStatus};
pub use calibration::{CalibrationTrace, NullTrace};
pub use control::RunContext;
pub use grid::RunMask;
pub use kernel::{KernelError, ProcessKernel, RelaxationKernel, RelaxationParams};
pub use output::{MemorySink, NullSink, OutputPolicy, OutputRecord, OutputSink};
pub use sequencer::{
    CohortReport, CohortSequencer, InitialState, SequencerOptions, SequencerState, SkipReason,
    StageOutcome, StageStatus,
};
