//! # Batch Runner
//!
//! Runs every enabled cohort of a run mask end-to-end on a fixed pool of
//! workers. Each worker owns one static partition and runs its cohorts
//! one after another; no cohort state is shared between workers.

use crate::grid::{RunMask, partition};
use crate::plan::StageKind;
use crate::sequencer::{CohortReport, CohortSequencer, SkipReason, StageStatus};
use crate::{CohortId, TundraError};
use std::sync::{Mutex, PoisonError};

/// Per-cohort run status, with the numeric codes of the run status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunStatus {
    Success,
    Masked,
    Timeout,
    Fail,
    /// Stopped before every stage ran.
    Incomplete,
}

impl RunStatus {
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            RunStatus::Success => 100,
            RunStatus::Masked => 0,
            RunStatus::Timeout => -5,
            RunStatus::Fail => -100,
            RunStatus::Incomplete => -1,
        }
    }

    #[must_use]
    pub fn of(report: &CohortReport) -> Self {
        match report.failure() {
            Some((_, TundraError::TimeLimitExceeded { .. })) => RunStatus::Timeout,
            Some(_) => RunStatus::Fail,
            None if report
                .outcomes
                .iter()
                .any(|o| o.status == StageStatus::Skipped(SkipReason::Cancelled)) =>
            {
                RunStatus::Incomplete
            }
            None => RunStatus::Success,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::Masked => "masked",
            RunStatus::Timeout => "timeout",
            RunStatus::Fail => "fail",
            RunStatus::Incomplete => "incomplete",
        };
        write!(f, "{}", name)
    }
}

/// Result of a whole batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// One report per enabled cohort, row-major.
    pub cohorts: Vec<CohortReport>,
    pub masked: Vec<CohortId>,
}

impl RunReport {
    pub fn get(&self, cohort: CohortId) -> Option<&CohortReport> {
        self.cohorts.iter().find(|r| r.cohort == cohort)
    }

    #[must_use]
    pub fn status_of(&self, cohort: CohortId) -> Option<RunStatus> {
        if self.masked.contains(&cohort) {
            return Some(RunStatus::Masked);
        }
        self.get(cohort).map(RunStatus::of)
    }

    /// Every enabled cohort completed every stage.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.cohorts
            .iter()
            .all(|r| RunStatus::of(r) == RunStatus::Success)
    }

    /// (cohort, failing stage, error) for every failed cohort.
    pub fn failures(&self) -> impl Iterator<Item = (CohortId, StageKind, &TundraError)> + '_ {
        self.cohorts
            .iter()
            .filter_map(|r| r.failure().map(|(stage, e)| (r.cohort, stage, e)))
    }

    /// Number of cohorts per status, masked cells included.
    #[must_use]
    pub fn tally(&self) -> Vec<(RunStatus, usize)> {
        let mut counts = std::collections::BTreeMap::new();
        for r in &self.cohorts {
            *counts.entry(RunStatus::of(r)).or_insert(0) += 1;
        }
        if !self.masked.is_empty() {
            counts.insert(RunStatus::Masked, self.masked.len());
        }
        counts.into_iter().collect()
    }
}

#[derive(Debug)]
pub struct BatchRunner<'a> {
    sequencer: CohortSequencer<'a>,
    workers: usize,
}

impl<'a> BatchRunner<'a> {
    /// `workers = 0` uses the number of available CPUs.
    #[must_use]
    pub fn new(sequencer: CohortSequencer<'a>, workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        Self { sequencer, workers }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run(&self, mask: &RunMask) -> Result<RunReport, TundraError> {
        let cells = mask.enabled_cells();
        let partitions = partition(&cells, self.workers);
        tracing::info!(
            "Running {} cohorts in {} partitions through stages [{}]",
            cells.len(),
            partitions.len(),
            self.sequencer
                .plan()
                .kinds()
                .map(|k| k.code())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(partitions.len().max(1))
            .thread_name(|i| format!("tundra-worker-{}", i))
            .build()
            .map_err(|e| TundraError::WorkerPool(e.to_string()))?;

        let reports = Mutex::new(Vec::with_capacity(cells.len()));
        let sequencer = &self.sequencer;
        pool.scope(|scope| {
            for part in &partitions {
                let reports = &reports;
                scope.spawn(move |_| {
                    for &cohort in part {
                        let report = sequencer.run(cohort);
                        reports
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(report);
                    }
                });
            }
        });

        let mut cohorts = reports.into_inner().unwrap_or_else(PoisonError::into_inner);
        cohorts.sort_by_key(|r| r.cohort);
        self.sequencer.sink().flush()?;

        let report = RunReport {
            cohorts,
            masked: mask.disabled_cells(),
        };
        for (status, count) in report.tally() {
            tracing::info!("{} cohorts: {}", status, count);
        }
        Ok(report)
    }
}
