//! # Stage Configuration Resolver
//!
//! Turns the raw `stage_settings` section of a run configuration into a
//! [`RunPlan`]. Resolution is pure: no file is touched, explicit restart
//! paths are only recorded.
//!
//! Rules:
//! - a stage is enabled iff its table is present
//! - `years` is required and must be positive
//! - unspecified toggles fall back to the least active setting (`env` only),
//!   never to another stage's toggles
//! - `restart_from` is refused on the pre-run and under `chain-only` mode
//! - `convergence` is refused on stages that cannot terminate early
//!
//! All problems found across all stages are reported in one error.

use crate::plan::{
    RestartSource, RunPlan, StageDescriptor, StageKind, SubsystemToggles, ToggleFlags,
};
use crate::primitives::{
    DEFAULT_CONVERGENCE_MIN_YEARS, DEFAULT_CONVERGENCE_TOLERANCE, DEFAULT_CONVERGENCE_WINDOW,
};
use crate::stability::ConvergenceCriteria;
use crate::TundraError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// RAW INPUT
// =============================================================================

/// Global restart policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    /// Stages may name an explicit restart file; others chain.
    #[default]
    AllowOverride,
    /// Every stage chains; any explicit restart file is an error.
    ChainOnly,
}

/// Raw subsystem toggles; `None` means "not mentioned".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModules {
    pub env: Option<bool>,
    pub bgc: Option<bool>,
    pub nfeed: Option<bool>,
    pub avlnflg: Option<bool>,
    pub baseline: Option<bool>,
    pub dsb: Option<bool>,
    pub dsl: Option<bool>,
    pub dyn_lai: Option<bool>,
}

impl RawModules {
    /// Fill unspecified toggles from the least active default.
    #[must_use]
    pub fn to_flags(&self) -> ToggleFlags {
        let d = ToggleFlags::default();
        ToggleFlags {
            env: self.env.unwrap_or(d.env),
            bgc: self.bgc.unwrap_or(d.bgc),
            nfeed: self.nfeed.unwrap_or(d.nfeed),
            avlnflg: self.avlnflg.unwrap_or(d.avlnflg),
            baseline: self.baseline.unwrap_or(d.baseline),
            dsb: self.dsb.unwrap_or(d.dsb),
            dsl: self.dsl.unwrap_or(d.dsl),
            dyn_lai: self.dyn_lai.unwrap_or(d.dyn_lai),
        }
    }
}

/// Raw early-termination settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConvergence {
    pub window: Option<u32>,
    pub tolerance: Option<f64>,
    pub min_years: Option<u32>,
}

/// Raw settings of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStage {
    pub years: Option<i64>,
    #[serde(default)]
    pub modules: RawModules,
    /// Empty string means "not set".
    #[serde(default)]
    pub restart_from: Option<String>,
    #[serde(default)]
    pub convergence: Option<RawConvergence>,
}

/// The `stage_settings` section of a run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSettings {
    #[serde(default)]
    pub inter_stage_pause: bool,
    #[serde(default)]
    pub restart_mode: RestartMode,
    pub pr: Option<RawStage>,
    pub eq: Option<RawStage>,
    pub sp: Option<RawStage>,
    pub tr: Option<RawStage>,
    pub sc: Option<RawStage>,
}

impl StageSettings {
    #[must_use]
    pub fn stage(&self, kind: StageKind) -> Option<&RawStage> {
        match kind {
            StageKind::PreRun => self.pr.as_ref(),
            StageKind::Equilibrium => self.eq.as_ref(),
            StageKind::SpinUp => self.sp.as_ref(),
            StageKind::Transient => self.tr.as_ref(),
            StageKind::Scenario => self.sc.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: StageKind) -> &mut Option<RawStage> {
        match kind {
            StageKind::PreRun => &mut self.pr,
            StageKind::Equilibrium => &mut self.eq,
            StageKind::SpinUp => &mut self.sp,
            StageKind::Transient => &mut self.tr,
            StageKind::Scenario => &mut self.sc,
        }
    }

    /// Apply a command-line year override.
    ///
    /// `0` disables the stage; a positive count enables it (with default
    /// toggles if it was not configured) and replaces its years. Negative
    /// counts are kept so that resolution reports them.
    pub fn override_years(&mut self, kind: StageKind, years: i64) {
        let slot = self.slot_mut(kind);
        if years == 0 {
            *slot = None;
            return;
        }
        slot.get_or_insert_with(RawStage::default).years = Some(years);
    }

    /// Resolve into an immutable plan.
    pub fn resolve(&self) -> Result<RunPlan, TundraError> {
        let mut descriptors = Vec::new();
        let mut problems = Vec::new();

        for kind in StageKind::ALL {
            let Some(raw) = self.stage(kind) else {
                continue;
            };
            match self.resolve_stage(kind, raw) {
                Ok(d) => descriptors.push(d),
                Err(mut errs) => problems.append(&mut errs),
            }
        }

        if !problems.is_empty() {
            return Err(TundraError::Configuration(problems.join("; ")));
        }
        if descriptors.is_empty() {
            tracing::warn!("No stages enabled; the run will do nothing");
        }

        let plan = RunPlan::new(descriptors, self.inter_stage_pause)?;
        for d in plan.stages() {
            tracing::debug!(
                "Resolved {}: {} years, modules [{}], restart {:?}, convergence {:?}",
                d.kind,
                d.requested_years,
                d.modules,
                d.restart_source,
                d.convergence
            );
        }
        Ok(plan)
    }

    fn resolve_stage(&self, kind: StageKind, raw: &RawStage) -> Result<StageDescriptor, Vec<String>> {
        let code = kind.code();
        let mut problems = Vec::new();

        let years = match raw.years {
            None => {
                problems.push(format!("{}: years must be set", code));
                0
            }
            Some(y) if y <= 0 => {
                problems.push(format!("{}: years must be positive (got {})", code, y));
                0
            }
            Some(y) => match u32::try_from(y) {
                Ok(y) => y,
                Err(_) => {
                    problems.push(format!("{}: years {} out of range", code, y));
                    0
                }
            },
        };

        let modules = match SubsystemToggles::from_flags(raw.modules.to_flags()) {
            Ok(m) => Some(m),
            Err(e) => {
                let msg = match e {
                    TundraError::Configuration(m) => m,
                    other => other.to_string(),
                };
                problems.push(format!("{}: {}", code, msg));
                None
            }
        };

        let restart_source = match raw.restart_from.as_deref().map(str::trim) {
            None | Some("") => RestartSource::Chained,
            Some(path) => {
                if !kind.accepts_explicit_restart() {
                    problems.push(format!("{}: stage cannot restart from a file", code));
                } else if self.restart_mode == RestartMode::ChainOnly {
                    problems.push(format!(
                        "{}: restart_from is not permitted in chain-only restart mode",
                        code
                    ));
                }
                RestartSource::Explicit(PathBuf::from(path))
            }
        };

        let convergence = match raw.convergence {
            None => None,
            Some(_) if !kind.supports_convergence() => {
                problems.push(format!("{}: stage does not support convergence", code));
                None
            }
            Some(c) => match resolve_convergence(c, years) {
                Ok(c) => Some(c),
                Err(msg) => {
                    problems.push(format!("{}: {}", code, msg));
                    None
                }
            },
        };

        match modules {
            Some(modules) if problems.is_empty() => Ok(StageDescriptor {
                kind,
                requested_years: years,
                modules,
                restart_source,
                convergence,
            }),
            _ => Err(problems),
        }
    }
}

fn resolve_convergence(raw: RawConvergence, max_years: u32) -> Result<ConvergenceCriteria, String> {
    let window = raw.window.unwrap_or(DEFAULT_CONVERGENCE_WINDOW);
    let tolerance = raw.tolerance.unwrap_or(DEFAULT_CONVERGENCE_TOLERANCE);
    let min_years = raw.min_years.unwrap_or(DEFAULT_CONVERGENCE_MIN_YEARS.min(max_years));

    if window == 0 {
        return Err("convergence window must be at least 1".to_string());
    }
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(format!("convergence tolerance must be positive (got {})", tolerance));
    }
    if min_years > max_years {
        return Err(format!(
            "convergence min_years {} exceeds years {}",
            min_years, max_years
        ));
    }
    Ok(ConvergenceCriteria {
        window,
        tolerance,
        min_years,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(years: i64) -> RawStage {
        RawStage {
            years: Some(years),
            ..RawStage::default()
        }
    }

    #[test]
    fn unmentioned_stages_disabled() {
        let settings = StageSettings {
            eq: Some(stage(100)),
            tr: Some(stage(109)),
            ..StageSettings::default()
        };
        let plan = settings.resolve().expect("resolve");
        let kinds: Vec<_> = plan.kinds().collect();
        assert_eq!(kinds, vec![StageKind::Equilibrium, StageKind::Transient]);
    }

    #[test]
    fn unspecified_toggles_do_not_carry_over() {
        let mut eq = stage(100);
        eq.modules.bgc = Some(true);
        eq.modules.nfeed = Some(true);
        let settings = StageSettings {
            eq: Some(eq),
            sp: Some(stage(20)),
            ..StageSettings::default()
        };
        let plan = settings.resolve().expect("resolve");
        let sp = plan.get(StageKind::SpinUp).expect("sp");
        assert_eq!(sp.modules, SubsystemToggles::env_only());
    }

    #[test]
    fn zero_and_negative_years_rejected() {
        let settings = StageSettings {
            eq: Some(stage(0)),
            sp: Some(stage(-3)),
            tr: Some(RawStage::default()),
            ..StageSettings::default()
        };
        let err = settings.resolve().expect_err("must fail").to_string();
        assert!(err.contains("eq: years must be positive (got 0)"));
        assert!(err.contains("sp: years must be positive (got -3)"));
        assert!(err.contains("tr: years must be set"));
    }

    #[test]
    fn contradictory_toggles_rejected() {
        let mut eq = stage(100);
        eq.modules.nfeed = Some(true);
        eq.modules.bgc = Some(false);
        let settings = StageSettings {
            eq: Some(eq),
            ..StageSettings::default()
        };
        let err = settings.resolve().expect_err("must fail");
        assert!(matches!(err, TundraError::Configuration(ref m) if m.contains("eq: nfeed requires bgc")));
    }

    #[test]
    fn explicit_restart_rules() {
        let mut pr = stage(10);
        pr.restart_from = Some("/data/restart-pr.redb".into());
        let settings = StageSettings {
            pr: Some(pr),
            ..StageSettings::default()
        };
        assert!(settings.resolve().is_err());

        let mut eq = stage(100);
        eq.restart_from = Some("/data/restart-eq.redb".into());
        let mut settings = StageSettings {
            eq: Some(eq),
            sp: Some(stage(20)),
            ..StageSettings::default()
        };
        let plan = settings.resolve().expect("resolve");
        assert_eq!(
            plan.get(StageKind::Equilibrium).expect("eq").restart_source,
            RestartSource::Explicit(PathBuf::from("/data/restart-eq.redb"))
        );
        assert_eq!(
            plan.get(StageKind::SpinUp).expect("sp").restart_source,
            RestartSource::Chained
        );

        settings.restart_mode = RestartMode::ChainOnly;
        let err = settings.resolve().expect_err("chain-only").to_string();
        assert!(err.contains("chain-only"));
    }

    #[test]
    fn empty_restart_path_is_chained() {
        let mut sp = stage(20);
        sp.restart_from = Some("  ".into());
        let settings = StageSettings {
            sp: Some(sp),
            restart_mode: RestartMode::ChainOnly,
            ..StageSettings::default()
        };
        let plan = settings.resolve().expect("resolve");
        assert_eq!(plan.stages()[0].restart_source, RestartSource::Chained);
    }

    #[test]
    fn convergence_only_on_equilibrium() {
        let mut sp = stage(20);
        sp.convergence = Some(RawConvergence::default());
        let settings = StageSettings {
            sp: Some(sp),
            ..StageSettings::default()
        };
        assert!(settings.resolve().is_err());

        let mut eq = stage(20000);
        eq.convergence = Some(RawConvergence {
            window: Some(20),
            ..RawConvergence::default()
        });
        let settings = StageSettings {
            eq: Some(eq),
            ..StageSettings::default()
        };
        let plan = settings.resolve().expect("resolve");
        let criteria = plan.stages()[0].convergence.expect("criteria");
        assert_eq!(criteria.window, 20);
        assert_eq!(criteria.min_years, DEFAULT_CONVERGENCE_MIN_YEARS);
    }

    #[test]
    fn convergence_bounds_checked() {
        let mut eq = stage(50);
        eq.convergence = Some(RawConvergence {
            window: Some(0),
            tolerance: Some(-1.0),
            min_years: Some(80),
        });
        let settings = StageSettings {
            eq: Some(eq),
            ..StageSettings::default()
        };
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn year_overrides() {
        let mut settings = StageSettings {
            eq: Some(stage(100)),
            sp: Some(stage(20)),
            ..StageSettings::default()
        };
        settings.override_years(StageKind::SpinUp, 0);
        settings.override_years(StageKind::Transient, 5);
        settings.override_years(StageKind::Equilibrium, 300);

        let plan = settings.resolve().expect("resolve");
        let years: Vec<_> = plan
            .stages()
            .iter()
            .map(|d| (d.kind, d.requested_years))
            .collect();
        assert_eq!(
            years,
            vec![(StageKind::Equilibrium, 300), (StageKind::Transient, 5)]
        );
    }
}
