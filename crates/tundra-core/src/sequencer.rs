//! # Stage Sequencer
//!
//! Runs one cohort through every enabled stage of a [`RunPlan`].
//!
//! ## State machine
//!
//! ```text
//! Idle ─► Resolving ─┬─► Initializing(S) ─► Running(S) ─► Finalizing(S) ─┐
//!                    │          ▲                                        │
//!                    │          └────────────────────────────────────────┘
//!                    └─► Done
//!  any non-terminal ─► Failed
//! ```
//!
//! - **Initializing**: chained or explicit snapshot from the store; a
//!   missing chained snapshot falls back to the kernel's cold start
//! - **Running**: 12 kernel calls per year, output and calibration hooks,
//!   stability check at each year end
//! - **Finalizing**: terminal state written to the store under (cohort, S)
//!
//! A failure ends this cohort only. Remaining stages are reported as
//! skipped and every snapshot already written stays in the store.

use crate::calibration::{CalibrationTrace, NullTrace};
use crate::control::RunContext;
use crate::kernel::ProcessKernel;
use crate::output::{NullSink, OutputPolicy, OutputRecord, OutputSink};
use crate::plan::{RestartSource, RunPlan, StageDescriptor, StageKind};
use crate::primitives::MONTHS_PER_YEAR;
use crate::stability::{Decision, StabilityEvaluator};
use crate::state::Aggregates;
use crate::storage::SnapshotStore;
use crate::{CohortId, ModelStateSnapshot, TimeStep, TundraError};
use std::path::PathBuf;
use std::time::{Duration, Instant};

// =============================================================================
// STATES AND OUTCOMES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Resolving,
    Initializing(StageKind),
    Running(StageKind),
    Finalizing(StageKind),
    Done,
    Failed,
}

impl SequencerState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Done | SequencerState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: SequencerState) -> bool {
        use SequencerState::{Done, Failed, Finalizing, Idle, Initializing, Resolving, Running};
        match (*self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, Resolving) => true,
            (Resolving | Finalizing(_), Initializing(_) | Done) => true,
            (Initializing(a), Running(b)) | (Running(a), Finalizing(b)) => a == b,
            _ => false,
        }
    }
}

/// Where a completed stage took its initial state from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialState {
    ColdStart,
    Chained(StageKind),
    Explicit(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Resumed run: the stage's snapshot already exists.
    AlreadyComplete,
    /// A stop was requested before the stage began.
    Cancelled,
    /// An earlier stage of this cohort failed.
    PriorFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
    Completed {
        initial: InitialState,
        years_run: u32,
        /// `StopConverged` or `StopAtMax`.
        decision: Decision,
    },
    Failed(TundraError),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: StageKind,
    pub status: StageStatus,
}

/// Everything one cohort did in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortReport {
    pub cohort: CohortId,
    pub outcomes: Vec<StageOutcome>,
    /// States visited, in order.
    pub states: Vec<SequencerState>,
    pub elapsed: Duration,
}

impl CohortReport {
    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    /// The error that ended this cohort, if any.
    pub fn failure(&self) -> Option<(StageKind, &TundraError)> {
        self.outcomes.iter().find_map(|o| match &o.status {
            StageStatus::Failed(e) => Some((o.stage, e)),
            _ => None,
        })
    }

    /// Stages completed in this run, in order.
    pub fn completed(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StageStatus::Completed { .. }))
            .map(|o| o.stage)
    }

    /// Every stage is either completed now or was completed by an earlier run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| {
            matches!(
                o.status,
                StageStatus::Completed { .. } | StageStatus::Skipped(SkipReason::AlreadyComplete)
            )
        })
    }

    #[must_use]
    pub fn final_state(&self) -> SequencerState {
        self.states.last().copied().unwrap_or(SequencerState::Idle)
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Skip stages whose snapshot is already in the store.
    pub resume: bool,
    /// Wall-clock limit per cohort, across all of its stages. Checked every month.
    pub cell_time_limit: Option<Duration>,
    pub output: OutputPolicy,
}

struct Machine {
    cohort: CohortId,
    states: Vec<SequencerState>,
}

impl Machine {
    fn new(cohort: CohortId) -> Self {
        Self {
            cohort,
            states: vec![SequencerState::Idle],
        }
    }

    fn current(&self) -> SequencerState {
        self.states.last().copied().unwrap_or(SequencerState::Idle)
    }

    fn to(&mut self, next: SequencerState) {
        let current = self.current();
        if current.can_transition_to(next) {
            tracing::trace!("Cohort {}: {:?} -> {:?}", self.cohort, current, next);
            self.states.push(next);
        } else {
            tracing::error!(
                "Cohort {}: illegal transition {:?} -> {:?} ignored",
                self.cohort,
                current,
                next
            );
        }
    }
}

// =============================================================================
// SEQUENCER
// =============================================================================

/// Per-cohort run controller. Shared read-only across workers.
pub struct CohortSequencer<'a> {
    plan: &'a RunPlan,
    kernel: &'a dyn ProcessKernel,
    store: &'a dyn SnapshotStore,
    context: &'a RunContext,
    sink: &'a dyn OutputSink,
    trace: &'a dyn CalibrationTrace,
    options: SequencerOptions,
}

impl std::fmt::Debug for CohortSequencer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortSequencer")
            .field("plan", &self.plan)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> CohortSequencer<'a> {
    pub fn new(
        plan: &'a RunPlan,
        kernel: &'a dyn ProcessKernel,
        store: &'a dyn SnapshotStore,
        context: &'a RunContext,
    ) -> Self {
        Self {
            plan,
            kernel,
            store,
            context,
            sink: &NullSink,
            trace: &NullTrace,
            options: SequencerOptions::default(),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: &'a dyn OutputSink) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: &'a dyn CalibrationTrace) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn plan(&self) -> &RunPlan {
        self.plan
    }

    pub(crate) fn sink(&self) -> &dyn OutputSink {
        self.sink
    }

    /// Year count of each stage for this cohort, after fire-cycle stretching.
    fn resolve_years(&self, cohort: CohortId) -> Vec<u32> {
        let fri = self.kernel.fire_return_interval(cohort);
        self.plan
            .stages()
            .iter()
            .map(|d| {
                let years = d.effective_years(fri);
                if let Some(fri) = fri {
                    if d.kind == StageKind::Equilibrium && d.modules.dsb() {
                        if d.requested_years < fri {
                            tracing::warn!(
                                "Cohort {}: {} years is shorter than the fire return interval {}; \
                                 the stage will not complete a fire cycle",
                                cohort,
                                d.requested_years,
                                fri
                            );
                        } else if years != d.requested_years {
                            tracing::info!(
                                "Cohort {}: equilibrium adjusted from {} to {} years for fire return interval {}",
                                cohort,
                                d.requested_years,
                                years,
                                fri
                            );
                        }
                    }
                }
                years
            })
            .collect()
    }

    /// Run every enabled stage for one cohort.
    ///
    /// Never returns an error: failures are recorded in the report.
    pub fn run(&self, cohort: CohortId) -> CohortReport {
        let started = Instant::now();
        let mut machine = Machine::new(cohort);
        machine.to(SequencerState::Resolving);
        let years = self.resolve_years(cohort);

        let mut outcomes = Vec::with_capacity(self.plan.stages().len());
        let mut failed = false;

        for (descriptor, &years) in self.plan.stages().iter().zip(years.iter()) {
            let stage = descriptor.kind;
            let skip = if failed {
                Some(SkipReason::PriorFailure)
            } else if self.context.is_stop_requested() {
                Some(SkipReason::Cancelled)
            } else {
                None
            };
            if let Some(reason) = skip {
                outcomes.push(StageOutcome {
                    stage,
                    status: StageStatus::Skipped(reason),
                });
                continue;
            }

            if self.options.resume {
                match self.store.contains(cohort, stage) {
                    Ok(true) => {
                        tracing::info!("Cohort {}: {} already complete, skipping", cohort, stage);
                        outcomes.push(StageOutcome {
                            stage,
                            status: StageStatus::Skipped(SkipReason::AlreadyComplete),
                        });
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        machine.to(SequencerState::Failed);
                        outcomes.push(StageOutcome {
                            stage,
                            status: StageStatus::Failed(e),
                        });
                        failed = true;
                        continue;
                    }
                }
            }

            match self.run_stage(&mut machine, cohort, descriptor, years, started) {
                Ok(status) => {
                    outcomes.push(StageOutcome { stage, status });
                    if !self.plan.is_last(stage) {
                        self.context.pause_after(stage);
                    }
                }
                Err(e) => {
                    tracing::error!("Cohort {} failed in {}: {}", cohort, stage, e);
                    machine.to(SequencerState::Failed);
                    outcomes.push(StageOutcome {
                        stage,
                        status: StageStatus::Failed(e),
                    });
                    failed = true;
                }
            }
        }

        if !failed {
            machine.to(SequencerState::Done);
        }

        CohortReport {
            cohort,
            outcomes,
            states: machine.states,
            elapsed: started.elapsed(),
        }
    }

    fn run_stage(
        &self,
        machine: &mut Machine,
        cohort: CohortId,
        descriptor: &StageDescriptor,
        years: u32,
        cohort_started: Instant,
    ) -> Result<StageStatus, TundraError> {
        let stage = descriptor.kind;
        let span = tracing::info_span!("stage", cohort = %cohort, stage = stage.code());
        let _entered = span.enter();

        machine.to(SequencerState::Initializing(stage));
        let (mut state, initial) = self.initialize(cohort, descriptor)?;
        tracing::info!(
            "Starting {} for {} years from {:?} with modules [{}]",
            stage,
            years,
            initial,
            descriptor.modules
        );
        self.trace.stage_start(cohort, stage, &state);

        machine.to(SequencerState::Running(stage));
        let writes = self.options.output.writes(stage);
        // Held back until the stage finalizes, so a failed stage leaves no output.
        let mut pending = Vec::new();
        let mut evaluator = StabilityEvaluator::new(descriptor.convergence, years);
        let mut year = 0u32;

        let decision = loop {
            let mut step = TimeStep {
                cohort,
                stage,
                year,
                month: 0,
            };
            for month in 0..MONTHS_PER_YEAR as u8 {
                step.month = month;
                state = self
                    .kernel
                    .advance(&step, &state, &descriptor.modules)
                    .map_err(|e| TundraError::Kernel {
                        cohort,
                        stage,
                        year,
                        month,
                        message: e.message,
                    })?;
                tracing::trace!("Year {} month {} done", year, month);
                if writes && self.options.output.monthly {
                    pending.push(output_record(&step, Some(month), &state));
                }
                self.trace.monthly(&step, &state);

                if let Some(limit) = self.options.cell_time_limit {
                    if cohort_started.elapsed() > limit {
                        return Err(TundraError::TimeLimitExceeded {
                            cohort,
                            stage,
                            limit_secs: limit.as_secs(),
                        });
                    }
                }
            }
            if writes {
                pending.push(output_record(&step, None, &state));
            }
            self.trace.yearly(&step, &state);

            let decision = evaluator.observe(&Aggregates::from_state(&state));
            tracing::debug!("Year {} of {} done ({:?})", year + 1, years, decision);
            if decision.is_stop() {
                break decision;
            }
            year += 1;
        };

        let years_run = evaluator.years_elapsed();
        if decision == Decision::StopConverged {
            tracing::info!(
                "{} converged after {} of {} years",
                stage,
                years_run,
                years
            );
        }

        machine.to(SequencerState::Finalizing(stage));
        for record in &pending {
            self.sink.record(record)?;
        }
        self.store.put(cohort, stage, &state)?;
        self.trace.stage_end(cohort, stage, years_run, &state);
        tracing::info!("Completed {} ({} years)", stage, years_run);

        Ok(StageStatus::Completed {
            initial,
            years_run,
            decision,
        })
    }

    fn initialize(
        &self,
        cohort: CohortId,
        descriptor: &StageDescriptor,
    ) -> Result<(ModelStateSnapshot, InitialState), TundraError> {
        let stage = descriptor.kind;
        let predecessor = self.plan.predecessor(stage);

        match self.store.get(cohort, predecessor, &descriptor.restart_source) {
            Ok(state) => {
                let origin = match (&descriptor.restart_source, predecessor) {
                    (RestartSource::Explicit(path), _) => InitialState::Explicit(path.clone()),
                    (RestartSource::Chained, Some(prev)) => InitialState::Chained(prev),
                    (RestartSource::Chained, None) => InitialState::ColdStart,
                };
                Ok((state, origin))
            }
            Err(TundraError::SnapshotNotFound(reason)) => {
                if let RestartSource::Explicit(_) = descriptor.restart_source {
                    return Err(TundraError::Initialization {
                        cohort,
                        stage,
                        reason,
                    });
                }
                let Some(state) = self.kernel.cold_start(cohort, stage) else {
                    return Err(TundraError::Initialization {
                        cohort,
                        stage,
                        reason: format!("{}; no cold start exists for this stage", reason),
                    });
                };
                if predecessor.is_some() {
                    tracing::warn!("{}; falling back to cold start", reason);
                }
                Ok((state, InitialState::ColdStart))
            }
            Err(e) => Err(e),
        }
    }
}

fn output_record(step: &TimeStep, month: Option<u8>, state: &ModelStateSnapshot) -> OutputRecord {
    OutputRecord {
        cohort: step.cohort,
        stage: step.stage,
        year: step.year,
        month,
        values: Aggregates::from_state(state),
    }
}

// =============================================================================
// TESTS
// =============================================================================
