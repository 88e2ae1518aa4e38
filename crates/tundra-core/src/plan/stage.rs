//! # Stage Kinds and Descriptors
//!
//! ## Stage Definitions
//!
//! | Stage | Code | Cold start | Early termination |
//! |-------|------|------------|-------------------|
//! | PreRun | `pr` | kernel-defined | no |
//! | Equilibrium | `eq` | kernel-defined | optional convergence |
//! | SpinUp | `sp` | no | no |
//! | Transient | `tr` | no | no |
//! | Scenario | `sc` | no | no |
//!
//! Execution order among enabled stages is always the order of this table.

use crate::stability::ConvergenceCriteria;
use crate::{SubsystemToggles, TundraError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// STAGE KIND
// =============================================================================

/// One phase of the simulation.
///
/// The derived `Ord` is the canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    PreRun,
    Equilibrium,
    SpinUp,
    Transient,
    Scenario,
}

impl StageKind {
    /// All stages in canonical order.
    pub const ALL: [StageKind; 5] = [
        StageKind::PreRun,
        StageKind::Equilibrium,
        StageKind::SpinUp,
        StageKind::Transient,
        StageKind::Scenario,
    ];

    /// Two-letter stage code used in restart and output file names.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            StageKind::PreRun => "pr",
            StageKind::Equilibrium => "eq",
            StageKind::SpinUp => "sp",
            StageKind::Transient => "tr",
            StageKind::Scenario => "sc",
        }
    }

    /// Parse a two-letter stage code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<StageKind> {
        StageKind::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Get the stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::PreRun => "Pre-run",
            StageKind::Equilibrium => "Equilibrium",
            StageKind::SpinUp => "Spin-up",
            StageKind::Transient => "Transient",
            StageKind::Scenario => "Scenario",
        }
    }

    /// Whether the stage may stop early once the state is stable.
    #[must_use]
    pub fn supports_convergence(&self) -> bool {
        matches!(self, StageKind::Equilibrium)
    }

    /// Whether the stage may be seeded from an explicit external snapshot.
    ///
    /// The pre-run always starts from the model's own initial state.
    #[must_use]
    pub fn accepts_explicit_restart(&self) -> bool {
        !matches!(self, StageKind::PreRun)
    }

    /// Restart file name for snapshots produced by this stage.
    #[must_use]
    pub fn restart_file_name(&self) -> String {
        format!("restart-{}.redb", self.code())
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

// =============================================================================
// RESTART SOURCE
// =============================================================================

/// Where a stage takes its initial state from, decided at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartSource {
    /// The terminal snapshot of the immediately preceding enabled stage.
    Chained,
    /// A named external restart file, bypassing the chain.
    Explicit(PathBuf),
}

// =============================================================================
// STAGE DESCRIPTOR
// =============================================================================

/// Resolved settings for one enabled stage. Read-only after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub kind: StageKind,
    /// Fixed duration, or the maximum duration when `convergence` is set.
    pub requested_years: u32,
    pub modules: SubsystemToggles,
    pub restart_source: RestartSource,
    pub convergence: Option<ConvergenceCriteria>,
}

impl StageDescriptor {
    /// Effective year count once the kernel's fire return interval is known.
    ///
    /// Only an Equilibrium stage with disturbance enabled is stretched to
    /// whole fire cycles; every other stage keeps its requested years.
    #[must_use]
    pub fn effective_years(&self, fire_return_interval: Option<u32>) -> u32 {
        match (self.kind, fire_return_interval) {
            (StageKind::Equilibrium, Some(fri)) if self.modules.dsb() => {
                fire_cycle_adjusted_years(self.requested_years, fri)
            }
            _ => self.requested_years,
        }
    }
}

/// Stretch an equilibrium year count to end two years short of a fire.
///
/// When fewer years than one return interval are requested the count is
/// left unchanged (the stage will not complete a disturbance cycle).
#[must_use]
pub fn fire_cycle_adjusted_years(years: u32, fri: u32) -> u32 {
    if fri == 0 || years < fri {
        return years;
    }
    let cycles = years / fri;
    if years % fri != 0 {
        fri.saturating_mul(cycles.saturating_add(1)).saturating_sub(2)
    } else {
        years.saturating_sub(2)
    }
}

// =============================================================================
// RUN PLAN
// =============================================================================

/// Ordered, immutable sequence of enabled stages for one run invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    stages: Vec<StageDescriptor>,
    inter_stage_pause: bool,
}

impl RunPlan {
    /// Build a plan from descriptors.
    ///
    /// Descriptors are sorted into canonical order; a stage listed twice
    /// is a configuration error.
    pub fn new(
        mut stages: Vec<StageDescriptor>,
        inter_stage_pause: bool,
    ) -> Result<Self, TundraError> {
        stages.sort_by_key(|d| d.kind);
        if let Some(pair) = stages.windows(2).find(|w| w[0].kind == w[1].kind) {
            return Err(TundraError::Configuration(format!(
                "stage {} listed more than once",
                pair[0].kind
            )));
        }
        Ok(Self {
            stages,
            inter_stage_pause,
        })
    }

    /// Enabled stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Enabled stage kinds in execution order.
    pub fn kinds(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().map(|d| d.kind)
    }

    #[must_use]
    pub fn get(&self, kind: StageKind) -> Option<&StageDescriptor> {
        self.stages.iter().find(|d| d.kind == kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn inter_stage_pause(&self) -> bool {
        self.inter_stage_pause
    }

    /// The enabled stage immediately before `kind`, if any.
    #[must_use]
    pub fn predecessor(&self, kind: StageKind) -> Option<StageKind> {
        self.kinds().take_while(|k| *k != kind).last()
    }

    /// Whether `kind` is the last enabled stage.
    #[must_use]
    pub fn is_last(&self, kind: StageKind) -> bool {
        self.stages.last().is_some_and(|d| d.kind == kind)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ToggleFlags;

    fn descriptor(kind: StageKind, years: u32) -> StageDescriptor {
        StageDescriptor {
            kind,
            requested_years: years,
            modules: SubsystemToggles::env_only(),
            restart_source: RestartSource::Chained,
            convergence: None,
        }
    }

    #[test]
    fn stage_ordering() {
        assert!(StageKind::PreRun < StageKind::Equilibrium);
        assert!(StageKind::Equilibrium < StageKind::SpinUp);
        assert!(StageKind::SpinUp < StageKind::Transient);
        assert!(StageKind::Transient < StageKind::Scenario);
    }

    #[test]
    fn codes_roundtrip() {
        for kind in StageKind::ALL {
            assert_eq!(StageKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(StageKind::from_code("xx"), None);
        assert_eq!(StageKind::SpinUp.restart_file_name(), "restart-sp.redb");
    }

    #[test]
    fn plan_sorts_and_links_predecessors() {
        let plan = RunPlan::new(
            vec![
                descriptor(StageKind::Transient, 109),
                descriptor(StageKind::Equilibrium, 100),
                descriptor(StageKind::Scenario, 91),
            ],
            false,
        )
        .expect("plan");

        let kinds: Vec<_> = plan.kinds().collect();
        assert_eq!(
            kinds,
            vec![StageKind::Equilibrium, StageKind::Transient, StageKind::Scenario]
        );
        assert_eq!(plan.predecessor(StageKind::Equilibrium), None);
        assert_eq!(
            plan.predecessor(StageKind::Transient),
            Some(StageKind::Equilibrium)
        );
        assert!(plan.is_last(StageKind::Scenario));
        assert!(!plan.is_last(StageKind::Transient));
    }

    #[test]
    fn duplicate_stage_rejected() {
        let result = RunPlan::new(
            vec![
                descriptor(StageKind::SpinUp, 1),
                descriptor(StageKind::SpinUp, 2),
            ],
            false,
        );
        assert!(matches!(result, Err(TundraError::Configuration(_))));
    }

    #[test]
    fn fire_cycle_adjustment() {
        // 100 years with a 30 year interval: 4 cycles, 2 years short
        assert_eq!(fire_cycle_adjusted_years(100, 30), 118);
        assert_eq!(fire_cycle_adjusted_years(90, 30), 88);
        assert_eq!(fire_cycle_adjusted_years(20, 30), 20);
        assert_eq!(fire_cycle_adjusted_years(20, 0), 20);
    }

    #[test]
    fn only_equilibrium_with_disturbance_is_adjusted() {
        let mut eq = descriptor(StageKind::Equilibrium, 100);
        assert_eq!(eq.effective_years(Some(30)), 100);

        eq.modules = SubsystemToggles::from_flags(ToggleFlags {
            dsb: true,
            ..ToggleFlags::default()
        })
        .expect("valid toggles");
        assert_eq!(eq.effective_years(Some(30)), 118);
        assert_eq!(eq.effective_years(None), 100);

        let mut sp = descriptor(StageKind::SpinUp, 100);
        sp.modules = eq.modules;
        assert_eq!(sp.effective_years(Some(30)), 100);
    }
}
