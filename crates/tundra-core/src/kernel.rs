//! # Process Kernel
//!
//! The physical and biogeochemical process models sit behind
//! [`ProcessKernel`]. The sequencer calls `advance` once per simulated month
//! and treats any `KernelError` as a failure of that cohort.
//!
//! `advance` must be total over valid input: it returns a fully updated
//! state or an error, never a partial update. It must also be a pure
//! function of its arguments so that checkpoint and resume are exact.
//!
//! [`RelaxationKernel`] is a deterministic surrogate used by the CLI and
//! the tests. Every pool relaxes toward a cohort-specific target; it makes
//! no claim to physical realism.

use crate::plan::StageKind;
use crate::primitives::MONTHS_PER_YEAR;
use crate::state::{Aggregates, Front, FrontKind, FrozenState, Horizon, SnowLayer};
use crate::{CohortId, ModelStateSnapshot, SubsystemToggles, TimeStep, TundraError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of one kernel time step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct KernelError {
    pub message: String,
}

impl KernelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Process-model collaborator.
pub trait ProcessKernel: Send + Sync {
    /// Model-defined initial state, for stage kinds that have one.
    fn cold_start(&self, cohort: CohortId, stage: StageKind) -> Option<ModelStateSnapshot>;

    /// Fire return interval of a cohort, in years, when fire is modelled.
    fn fire_return_interval(&self, _cohort: CohortId) -> Option<u32> {
        None
    }

    /// Advance one month.
    fn advance(
        &self,
        step: &TimeStep,
        state: &ModelStateSnapshot,
        modules: &SubsystemToggles,
    ) -> Result<ModelStateSnapshot, KernelError>;
}

// =============================================================================
// REFERENCE KERNEL
// =============================================================================

/// Tunables of the reference kernel (`[kernel]` in the run configuration).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaxationParams {
    pub community_type: u32,
    /// Fraction of the distance to target closed per month, in (0, 1].
    pub relaxation_rate: f64,
    pub fire_return_interval: u32,
    /// Fraction of vegetation carbon burned by a fire, in [0, 1].
    pub fire_severity: f64,
    pub mean_air_temp: f64,
    pub air_temp_amplitude: f64,
}

impl Default for RelaxationParams {
    fn default() -> Self {
        Self {
            community_type: 4,
            relaxation_rate: 0.05,
            fire_return_interval: 100,
            fire_severity: 0.5,
            mean_air_temp: -6.0,
            air_temp_amplitude: 18.0,
        }
    }
}

// Per-PFT full-cover targets (g/m2)
const LEAF_C: f64 = 60.0;
const STEM_C: f64 = 400.0;
const ROOT_C: f64 = 150.0;
const VEG_CN: f64 = 50.0;
const SOIL_CN: f64 = 25.0;
// Carbon per metre of organic layer (g/m2/m)
const ORGANIC_C_DENSITY: f64 = 30_000.0;
const SPECIFIC_LEAF_AREA: f64 = 0.012;
const MIN_ORGANIC_THICKNESS: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct RelaxationKernel {
    params: RelaxationParams,
}

impl RelaxationKernel {
    pub fn new(params: RelaxationParams) -> Result<Self, TundraError> {
        let mut problems = Vec::new();
        if !(params.relaxation_rate > 0.0 && params.relaxation_rate <= 1.0) {
            problems.push(format!(
                "kernel relaxation_rate must be in (0, 1] (got {})",
                params.relaxation_rate
            ));
        }
        if !(0.0..=1.0).contains(&params.fire_severity) {
            problems.push(format!(
                "kernel fire_severity must be in [0, 1] (got {})",
                params.fire_severity
            ));
        }
        if params.fire_return_interval == 0 {
            problems.push("kernel fire_return_interval must be positive".to_string());
        }
        if !(params.mean_air_temp.is_finite() && params.air_temp_amplitude.is_finite()) {
            problems.push("kernel air temperature must be finite".to_string());
        }
        if !problems.is_empty() {
            return Err(TundraError::Configuration(problems.join("; ")));
        }
        Ok(Self { params })
    }

    #[must_use]
    pub fn params(&self) -> &RelaxationParams {
        &self.params
    }

    /// Cohort-specific scaling of every target, in [1.0, 1.3].
    fn site_factor(cohort: CohortId) -> f64 {
        let h = (cohort.row.wrapping_mul(31) ^ cohort.col.wrapping_mul(17)) % 7;
        1.0 + 0.05 * f64::from(h)
    }

    fn air_temp(&self, month: u8) -> f64 {
        let phase = (f64::from(month) - 6.5) / MONTHS_PER_YEAR as f64 * std::f64::consts::TAU;
        self.params.mean_air_temp + self.params.air_temp_amplitude * phase.cos()
    }

    fn relax(&self, value: f64, target: f64) -> f64 {
        value + self.params.relaxation_rate * (target - value)
    }

    fn environment(&self, step: &TimeStep, s: &mut ModelStateSnapshot) {
        let air = self.air_temp(step.month);
        let mut depth = 0.0;
        for layer in &mut s.soil.layers {
            depth += layer.thickness;
            // damped toward the mean with depth
            let damping = (-depth / 2.0).exp();
            let target = self.params.mean_air_temp + (air - self.params.mean_air_temp) * damping;
            layer.temperature = self.relax(layer.temperature, target);

            let fraction = (0.5 - layer.temperature).clamp(0.0, 1.0);
            let water = layer.liquid + layer.ice;
            layer.frozen_fraction = fraction;
            layer.ice = water * fraction;
            layer.liquid = water - layer.ice;
            layer.frozen = if fraction >= 1.0 {
                FrozenState::Frozen
            } else if fraction <= 0.0 {
                FrozenState::Thawed
            } else {
                FrozenState::Partial
            };
        }
        for layer in &mut s.rock {
            layer.temperature = self.relax(layer.temperature, self.params.mean_air_temp);
        }

        // one front where the column first changes phase below the surface
        s.fronts.clear();
        let mut top = 0.0;
        let column = s.soil.depth();
        for pair in s.soil.layers.windows(2) {
            top += pair[0].thickness;
            let above = pair[0].frozen == FrozenState::Frozen;
            let below = pair[1].frozen == FrozenState::Frozen;
            if above != below && top < column {
                s.fronts.push(Front {
                    kind: if below {
                        FrontKind::Thawing
                    } else {
                        FrontKind::Freezing
                    },
                    depth: top,
                });
                break;
            }
        }

        // snow accumulates below freezing and melts above
        if air < 0.0 {
            let fall = 2.0;
            match s.snow.layers.first_mut() {
                Some(layer) => {
                    layer.ice += fall;
                    layer.thickness += fall / layer.density.max(1.0);
                    layer.age += 1.0 / MONTHS_PER_YEAR as f64;
                    layer.temperature = air;
                }
                None => s.snow.layers.push(SnowLayer {
                    thickness: fall / 250.0,
                    temperature: air,
                    liquid: 0.0,
                    ice: fall,
                    density: 250.0,
                    age: 0.0,
                }),
            }
            s.disturbance.days_since_snow = 0;
            s.ground.months_frozen = s.ground.months_frozen.saturating_add(1);
        } else {
            if let Some(layer) = s.snow.layers.pop() {
                if let Some(top_layer) = s.soil.layers.first_mut() {
                    top_layer.liquid += layer.ice + layer.liquid;
                }
            }
            s.disturbance.days_since_snow = s.disturbance.days_since_snow.saturating_add(30);
        }

        let root_zone_frozen = s
            .soil
            .layers
            .iter()
            .take(4)
            .all(|l| l.frozen == FrozenState::Frozen);
        if root_zone_frozen {
            s.ground.root_zone_frozen_days = s.ground.root_zone_frozen_days.saturating_add(30);
        } else {
            s.ground.root_zone_unfrozen_days = s.ground.root_zone_unfrozen_days.saturating_add(30);
        }
        s.ground.water_table = self.relax(s.ground.water_table, 0.3 + 0.1 * air.signum());
    }

    fn biogeochemistry(&self, step: &TimeStep, modules: &SubsystemToggles, s: &mut ModelStateSnapshot) {
        let site = Self::site_factor(s.cohort);
        let available: f64 = s.soil.layers.iter().map(|l| l.avail_n).sum();
        // nitrogen-limited growth scales targets by availability
        let n_limit = if modules.nfeed() {
            (available / (available + 0.5)).clamp(0.1, 1.0)
        } else {
            1.0
        };

        let mut litter_c = 0.0;
        let mut litter_n = 0.0;
        for pft in s.pfts.iter_mut().filter(|p| p.life_form.vegetated) {
            let scale = pft.cover * site * n_limit;
            for (pool, target) in [
                (&mut pft.leaf_c, LEAF_C * scale),
                (&mut pft.stem_c, STEM_C * scale),
                (&mut pft.root_c, ROOT_C * scale),
            ] {
                let next = self.relax(*pool, target);
                litter_c += 0.01 * *pool;
                *pool = next;
            }
            for (pool, c) in [
                (&mut pft.leaf_n, pft.leaf_c),
                (&mut pft.stem_n, pft.stem_c),
                (&mut pft.root_n, pft.root_c),
            ] {
                let next = self.relax(*pool, c / VEG_CN);
                litter_n += 0.01 * *pool;
                *pool = next;
            }
            pft.labile_n = self.relax(pft.labile_n, 0.01 * pft.leaf_c);
            pft.dead_c *= 0.99;
            pft.dead_n *= 0.99;
            pft.phenology.foliage_max = pft.phenology.foliage_max.max(pft.leaf_c / LEAF_C);
            if step.is_year_end() {
                pft.age = pft.age.saturating_add(1);
            }
        }

        let layers = s.soil.layers.len().max(1) as f64;
        for (i, layer) in s.soil.layers.iter_mut().enumerate() {
            let organic = layer.horizon != Horizon::Mineral;
            let share = if i == 0 { 1.0 } else { 0.0 };
            let target = if organic { 500.0 * site } else { 50.0 * site };
            layer.raw_c = self.relax(layer.raw_c + share * litter_c, target);
            layer.active_c = self.relax(layer.active_c, 0.5 * target);
            layer.resistant_c = self.relax(layer.resistant_c, target);
            layer.chemically_resistant_c =
                self.relax(layer.chemically_resistant_c, 2.0 * target);

            let n_target = if modules.baseline() {
                layer.soil_c() / SOIL_CN
            } else {
                layer.org_n
            };
            layer.org_n = self.relax(layer.org_n + share * litter_n, n_target);

            let mut avail = layer.avail_n;
            if modules.avlnflg() {
                // deposition in, leaching out
                avail += 0.01 / layers;
                avail *= 0.98;
            }
            avail += s.disturbance.fire_soil_n_deposition / (MONTHS_PER_YEAR as f64 * layers);
            layer.avail_n = avail;
            if let Some(history) = s.soil.litterfall_cn.get_mut(i) {
                history[step.month as usize % MONTHS_PER_YEAR] = if litter_n > 0.0 {
                    share * litter_c / litter_n
                } else {
                    0.0
                };
            }
        }
        s.debris.c *= 0.995;
        s.debris.n *= 0.995;
    }

    fn disturbance(&self, s: &mut ModelStateSnapshot) {
        if s.disturbance.years_since_fire < self.params.fire_return_interval {
            return;
        }
        let severity = self.params.fire_severity;
        let mut burned_n = 0.0;
        for pft in s.pfts.iter_mut().filter(|p| p.life_form.vegetated) {
            let killed_c = pft.stem_c * severity * 0.5;
            burned_n += (pft.leaf_n + pft.stem_n) * severity * 0.5;
            s.debris.c += killed_c;
            s.debris.n += killed_c / VEG_CN;
            for pool in [
                &mut pft.leaf_c,
                &mut pft.stem_c,
                &mut pft.leaf_n,
                &mut pft.stem_n,
            ] {
                *pool *= 1.0 - severity;
            }
            pft.age = 0;
        }
        if let Some(moss) = s.soil.layers.first_mut() {
            moss.raw_c *= 1.0 - severity;
        }
        s.disturbance.years_since_fire = 0;
        s.disturbance.years_since_disturbance = 0;
        s.disturbance.fire_soil_n_deposition = 0.1 * burned_n;
    }
}

impl ProcessKernel for RelaxationKernel {
    fn cold_start(&self, cohort: CohortId, stage: StageKind) -> Option<ModelStateSnapshot> {
        matches!(stage, StageKind::PreRun | StageKind::Equilibrium)
            .then(|| ModelStateSnapshot::cold_start(cohort, self.params.community_type))
    }

    fn fire_return_interval(&self, _cohort: CohortId) -> Option<u32> {
        Some(self.params.fire_return_interval)
    }

    fn advance(
        &self,
        step: &TimeStep,
        state: &ModelStateSnapshot,
        modules: &SubsystemToggles,
    ) -> Result<ModelStateSnapshot, KernelError> {
        let mut next = state.clone();

        if modules.env() {
            self.environment(step, &mut next);
        }
        if modules.bgc() {
            self.biogeochemistry(step, modules, &mut next);
        }
        if modules.dsl() {
            for layer in next.soil.layers.iter_mut().filter(|l| l.horizon != Horizon::Mineral) {
                layer.thickness = (layer.soil_c() / ORGANIC_C_DENSITY).max(MIN_ORGANIC_THICKNESS);
            }
            // fronts must stay inside the resized column
            let column = next.soil.depth();
            next.fronts.retain(|f| f.depth > 0.0 && f.depth < column);
        }
        if modules.dyn_lai() {
            for pft in &mut next.pfts {
                pft.lai = pft.leaf_c * SPECIFIC_LEAF_AREA;
            }
        }
        if step.is_year_end() {
            let d = &mut next.disturbance;
            d.years_since_fire = d.years_since_fire.saturating_add(1);
            d.years_since_disturbance = d.years_since_disturbance.saturating_add(1);
            if modules.dsb() {
                self.disturbance(&mut next);
            } else {
                next.disturbance.fire_soil_n_deposition *= 0.5;
            }
        }

        let agg = Aggregates::from_state(&next);
        if [agg.veg_c, agg.soil_c, agg.total_n(), agg.water, agg.soil_temp]
            .iter()
            .any(|v| !v.is_finite())
        {
            return Err(KernelError::new("non-finite state after time step"));
        }
        next.validate().map_err(KernelError::new)?;
        Ok(next)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ToggleFlags;

    fn kernel() -> RelaxationKernel {
        RelaxationKernel::new(RelaxationParams::default()).expect("kernel")
    }

    fn toggles(flags: ToggleFlags) -> SubsystemToggles {
        SubsystemToggles::from_flags(flags).expect("toggles")
    }

    fn all_on() -> SubsystemToggles {
        toggles(ToggleFlags {
            env: true,
            bgc: true,
            nfeed: true,
            avlnflg: true,
            baseline: true,
            dsb: true,
            dsl: true,
            dyn_lai: true,
        })
    }

    fn run_years(
        k: &RelaxationKernel,
        mut s: ModelStateSnapshot,
        modules: &SubsystemToggles,
        years: u32,
    ) -> ModelStateSnapshot {
        for year in 0..years {
            for month in 0..MONTHS_PER_YEAR as u8 {
                let step = TimeStep {
                    cohort: s.cohort,
                    stage: StageKind::Equilibrium,
                    year,
                    month,
                };
                s = k.advance(&step, &s, modules).expect("advance");
            }
        }
        s
    }

    #[test]
    fn rejects_bad_params() {
        let params = RelaxationParams {
            relaxation_rate: 1.5,
            fire_return_interval: 0,
            ..RelaxationParams::default()
        };
        let err = RelaxationKernel::new(params).expect_err("must fail").to_string();
        assert!(err.contains("relaxation_rate"));
        assert!(err.contains("fire_return_interval"));
    }

    #[test]
    fn cold_start_only_for_first_stages() {
        let k = kernel();
        let c = CohortId::new(0, 0);
        assert!(k.cold_start(c, StageKind::PreRun).is_some());
        assert!(k.cold_start(c, StageKind::Equilibrium).is_some());
        assert!(k.cold_start(c, StageKind::SpinUp).is_none());
        assert!(k.cold_start(c, StageKind::Scenario).is_none());
    }

    #[test]
    fn deterministic_and_valid_with_everything_on() {
        let k = kernel();
        let start = ModelStateSnapshot::cold_start(CohortId::new(2, 3), 4);
        let a = run_years(&k, start.clone(), &all_on(), 150);
        let b = run_years(&k, start, &all_on(), 150);
        assert_eq!(a, b);
        assert_eq!(a.validate(), Ok(()));
    }

    #[test]
    fn env_only_leaves_carbon_untouched() {
        let k = kernel();
        let start = ModelStateSnapshot::cold_start(CohortId::new(0, 0), 4);
        let end = run_years(&k, start.clone(), &SubsystemToggles::env_only(), 3);
        let before = Aggregates::from_state(&start);
        let after = Aggregates::from_state(&end);
        assert!((before.veg_c - after.veg_c).abs() < f64::EPSILON);
        assert!((before.soil_c - after.soil_c).abs() < f64::EPSILON);
        assert_ne!(before.soil_temp, after.soil_temp);
    }

    #[test]
    fn bgc_grows_vegetation_toward_target() {
        let k = kernel();
        let start = ModelStateSnapshot::cold_start(CohortId::new(0, 0), 4);
        let modules = toggles(ToggleFlags {
            bgc: true,
            ..ToggleFlags::default()
        });
        let end = run_years(&k, start.clone(), &modules, 20);
        assert!(Aggregates::from_state(&end).veg_c > Aggregates::from_state(&start).veg_c);
    }

    #[test]
    fn fire_resets_years_since_fire() {
        let params = RelaxationParams {
            fire_return_interval: 5,
            ..RelaxationParams::default()
        };
        let k = RelaxationKernel::new(params).expect("kernel");
        let start = ModelStateSnapshot::cold_start(CohortId::new(0, 0), 4);
        let end = run_years(&k, start, &all_on(), 12);
        // fires at the end of years 5 and 10
        assert_eq!(end.disturbance.years_since_fire, 2);
    }

    #[test]
    fn dynamic_lai_follows_leaf_carbon() {
        let k = kernel();
        let start = ModelStateSnapshot::cold_start(CohortId::new(0, 0), 4);
        let modules = toggles(ToggleFlags {
            bgc: true,
            dyn_lai: true,
            ..ToggleFlags::default()
        });
        let end = run_years(&k, start, &modules, 1);
        let pft = &end.pfts[0];
        assert!((pft.lai - pft.leaf_c * SPECIFIC_LEAF_AREA).abs() < 1e-12);
    }
}
