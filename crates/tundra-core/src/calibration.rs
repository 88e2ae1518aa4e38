//! # Calibration Trace
//!
//! Diagnostic hooks for interactive calibration. The sequencer calls them
//! as it goes; an implementation may dump state to an external tree. Hooks
//! cannot fail the run: implementations log their own I/O problems.

use crate::plan::StageKind;
use crate::{CohortId, ModelStateSnapshot, TimeStep};

pub trait CalibrationTrace: Send + Sync {
    fn stage_start(&self, _cohort: CohortId, _stage: StageKind, _initial: &ModelStateSnapshot) {}

    fn monthly(&self, _step: &TimeStep, _state: &ModelStateSnapshot) {}

    fn yearly(&self, _step: &TimeStep, _state: &ModelStateSnapshot) {}

    fn stage_end(
        &self,
        _cohort: CohortId,
        _stage: StageKind,
        _years_run: u32,
        _terminal: &ModelStateSnapshot,
    ) {
    }
}

/// Calibration tracing switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl CalibrationTrace for NullTrace {}
