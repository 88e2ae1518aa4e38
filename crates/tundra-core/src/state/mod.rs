//! # Model State
//!
//! The complete serializable state of one cohort at a stage boundary.
//!
//! A snapshot is self-sufficient: every quantity a process kernel reads when
//! advancing a month lives here, so loading a snapshot and continuing gives
//! the same trajectory as never having stopped.
//!
//! ## Layout
//!
//! ```text
//! ModelStateSnapshot
//! ├── pfts[NUM_PFT]          vegetation pools, phenology, root profile
//! ├── snow                   snow layers (top down) + extra mass
//! ├── soil                   moss → shallow organic → deep organic → mineral
//! ├── rock                   bedrock layers below the soil column
//! ├── fronts                 freeze/thaw fronts, ordered by depth
//! ├── ground                 water table, frozen-month and root-zone counters
//! ├── debris                 woody debris C/N
//! └── disturbance            years since fire/disturbance, fire N deposition
//! ```

mod aggregates;

pub use aggregates::Aggregates;

use crate::CohortId;
use crate::primitives::{
    MAX_FRONTS, MAX_ROCK_LAYERS, MAX_ROOT_LAYERS, MAX_SNOW_LAYERS, MAX_SOIL_LAYERS,
    MINERAL_THICKNESSES, MONTHS_PER_YEAR, NUM_PFT, PHENOLOGY_HISTORY_YEARS,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// VEGETATION
// =============================================================================

/// Life-form flags of a plant functional type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifeForm {
    pub vegetated: bool,
    pub woody: bool,
    pub deciduous: bool,
    pub non_vascular: bool,
}

/// Phenology scalars and their running histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phenology {
    pub foliage_max: f64,
    pub optimum_temp: f64,
    pub eet_max: f64,
    pub unnormalized_leaf_max: f64,
    pub growing_season_length: f64,
    pub optimum_temp_history: Vec<f64>,
    pub eet_max_history: Vec<f64>,
    pub unnormalized_leaf_history: Vec<f64>,
    pub growing_season_history: Vec<f64>,
}

impl Phenology {
    fn histories(&self) -> [(&'static str, &[f64]); 4] {
        [
            ("optimum temperature", &self.optimum_temp_history),
            ("eet maximum", &self.eet_max_history),
            ("unnormalized leaf", &self.unnormalized_leaf_history),
            ("growing season", &self.growing_season_history),
        ]
    }
}

/// One plant functional type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PftState {
    pub life_form: LifeForm,
    /// Fractional cover of the cell.
    pub cover: f64,
    pub lai: f64,
    pub age: u32,
    pub leaf_c: f64,
    pub stem_c: f64,
    pub root_c: f64,
    pub leaf_n: f64,
    pub stem_n: f64,
    pub root_n: f64,
    pub labile_n: f64,
    pub dead_c: f64,
    pub dead_n: f64,
    /// Intercepted canopy water and snow (kg/m2).
    pub canopy_water: f64,
    pub canopy_snow: f64,
    pub phenology: Phenology,
    /// Fraction of fine roots per root layer.
    pub root_fractions: Vec<f64>,
}

impl PftState {
    #[must_use]
    pub fn veg_c(&self) -> f64 {
        self.leaf_c + self.stem_c + self.root_c
    }

    #[must_use]
    pub fn veg_n(&self) -> f64 {
        self.leaf_n + self.stem_n + self.root_n + self.labile_n
    }
}

// =============================================================================
// SNOW, SOIL, ROCK
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowLayer {
    pub thickness: f64,
    pub temperature: f64,
    pub liquid: f64,
    pub ice: f64,
    pub density: f64,
    pub age: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnowPack {
    pub layers: Vec<SnowLayer>,
    /// Snow mass not yet large enough to form a layer.
    pub extra_mass: f64,
}

/// Horizon of a soil layer; the derived order is the top-down order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Horizon {
    Moss,
    ShallowOrganic,
    DeepOrganic,
    Mineral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrozenState {
    Thawed,
    Frozen,
    Partial,
}

/// Soil texture class index of a mineral layer (0 for organic layers).
pub type TextureClass = u8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilLayer {
    pub horizon: Horizon,
    pub thickness: f64,
    pub temperature: f64,
    pub liquid: f64,
    pub ice: f64,
    pub frozen: FrozenState,
    pub frozen_fraction: f64,
    pub texture: TextureClass,
    pub age: f64,
    /// Raw, active, physically and chemically resistant soil carbon.
    pub raw_c: f64,
    pub active_c: f64,
    pub resistant_c: f64,
    pub chemically_resistant_c: f64,
    pub org_n: f64,
    pub avail_n: f64,
}

impl SoilLayer {
    #[must_use]
    pub fn soil_c(&self) -> f64 {
        self.raw_c + self.active_c + self.resistant_c + self.chemically_resistant_c
    }
}

/// The soil layer stack and its per-layer 12-month litterfall C:N history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoilColumn {
    pub layers: Vec<SoilLayer>,
    pub litterfall_cn: Vec<[f64; MONTHS_PER_YEAR]>,
}

impl SoilColumn {
    #[must_use]
    pub fn depth(&self) -> f64 {
        self.layers.iter().map(|l| l.thickness).sum()
    }

    /// Number of layers of the given horizon.
    #[must_use]
    pub fn count(&self, horizon: Horizon) -> usize {
        self.layers.iter().filter(|l| l.horizon == horizon).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RockLayer {
    pub thickness: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontKind {
    Freezing,
    Thawing,
}

/// A freeze/thaw front at a depth below the soil surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Front {
    pub kind: FrontKind,
    pub depth: f64,
}

// =============================================================================
// COUNTERS AND HISTORY
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundState {
    pub water_table: f64,
    pub months_frozen: u32,
    pub root_zone_frozen_days: u32,
    pub root_zone_unfrozen_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WoodyDebris {
    pub c: f64,
    pub n: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceHistory {
    pub years_since_fire: u32,
    pub years_since_disturbance: u32,
    pub days_since_snow: u32,
    /// Soil N deposited by recent fires, spread over the following years.
    pub fire_soil_n_deposition: f64,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Complete state of one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStateSnapshot {
    pub cohort: CohortId,
    /// Community (vegetation) type of the cell.
    pub community_type: u32,
    pub pfts: Vec<PftState>,
    pub snow: SnowPack,
    pub soil: SoilColumn,
    pub rock: Vec<RockLayer>,
    pub fronts: Vec<Front>,
    pub ground: GroundState,
    pub debris: WoodyDebris,
    pub disturbance: DisturbanceHistory,
}

fn check_pool(problems: &mut Vec<String>, what: &str, value: f64) {
    if !value.is_finite() || value < 0.0 {
        problems.push(format!("{} is not a non-negative finite value ({})", what, value));
    }
}

fn check_thickness(problems: &mut Vec<String>, what: &str, value: f64) {
    if !value.is_finite() || value <= 0.0 {
        problems.push(format!("{} thickness must be positive ({})", what, value));
    }
}

fn check_finite(problems: &mut Vec<String>, what: &str, value: f64) {
    if !value.is_finite() {
        problems.push(format!("{} is not finite", what));
    }
}

impl ModelStateSnapshot {
    /// Structural validation.
    ///
    /// Returns every problem found, joined into one reason.
    pub fn validate(&self) -> Result<(), String> {
        let mut p = Vec::new();

        if self.pfts.len() != NUM_PFT {
            p.push(format!("expected {} PFTs, found {}", NUM_PFT, self.pfts.len()));
        }
        for (i, pft) in self.pfts.iter().enumerate() {
            self.validate_pft(&mut p, i, pft);
        }

        if self.snow.layers.len() > MAX_SNOW_LAYERS {
            p.push(format!(
                "{} snow layers exceed capacity {}",
                self.snow.layers.len(),
                MAX_SNOW_LAYERS
            ));
        }
        for (i, layer) in self.snow.layers.iter().enumerate() {
            let what = format!("snow layer {}", i);
            check_thickness(&mut p, &what, layer.thickness);
            check_finite(&mut p, &format!("{} temperature", what), layer.temperature);
            check_pool(&mut p, &format!("{} liquid", what), layer.liquid);
            check_pool(&mut p, &format!("{} ice", what), layer.ice);
            check_pool(&mut p, &format!("{} density", what), layer.density);
        }
        check_pool(&mut p, "snow extra mass", self.snow.extra_mass);

        self.validate_soil(&mut p);

        if self.rock.len() > MAX_ROCK_LAYERS {
            p.push(format!(
                "{} rock layers exceed capacity {}",
                self.rock.len(),
                MAX_ROCK_LAYERS
            ));
        }
        for (i, layer) in self.rock.iter().enumerate() {
            check_thickness(&mut p, &format!("rock layer {}", i), layer.thickness);
            check_finite(&mut p, &format!("rock layer {} temperature", i), layer.temperature);
        }

        if self.fronts.len() > MAX_FRONTS {
            p.push(format!(
                "{} fronts exceed capacity {}",
                self.fronts.len(),
                MAX_FRONTS
            ));
        }
        let depth = self.soil.depth();
        let mut previous = 0.0;
        for (i, front) in self.fronts.iter().enumerate() {
            if !(front.depth.is_finite() && front.depth > previous && front.depth <= depth) {
                p.push(format!(
                    "front {} depth {} not increasing inside the column",
                    i, front.depth
                ));
            }
            previous = front.depth;
        }

        check_finite(&mut p, "water table", self.ground.water_table);
        check_pool(&mut p, "woody debris C", self.debris.c);
        check_pool(&mut p, "woody debris N", self.debris.n);
        check_pool(
            &mut p,
            "fire soil N deposition",
            self.disturbance.fire_soil_n_deposition,
        );

        if p.is_empty() { Ok(()) } else { Err(p.join("; ")) }
    }

    fn validate_pft(&self, p: &mut Vec<String>, i: usize, pft: &PftState) {
        let pools = [
            ("cover", pft.cover),
            ("lai", pft.lai),
            ("leaf C", pft.leaf_c),
            ("stem C", pft.stem_c),
            ("root C", pft.root_c),
            ("leaf N", pft.leaf_n),
            ("stem N", pft.stem_n),
            ("root N", pft.root_n),
            ("labile N", pft.labile_n),
            ("dead C", pft.dead_c),
            ("dead N", pft.dead_n),
            ("canopy water", pft.canopy_water),
            ("canopy snow", pft.canopy_snow),
        ];
        for (name, value) in pools {
            check_pool(p, &format!("pft {} {}", i, name), value);
        }
        if pft.cover > 1.0 {
            p.push(format!("pft {} cover {} exceeds 1", i, pft.cover));
        }
        for (name, history) in pft.phenology.histories() {
            if history.len() != PHENOLOGY_HISTORY_YEARS {
                p.push(format!(
                    "pft {} {} history has {} years, expected {}",
                    i,
                    name,
                    history.len(),
                    PHENOLOGY_HISTORY_YEARS
                ));
            }
            if history.iter().any(|v| !v.is_finite()) {
                p.push(format!("pft {} {} history is not finite", i, name));
            }
        }
        if pft.root_fractions.len() > MAX_ROOT_LAYERS {
            p.push(format!(
                "pft {} has {} root layers, capacity {}",
                i,
                pft.root_fractions.len(),
                MAX_ROOT_LAYERS
            ));
        }
        for f in &pft.root_fractions {
            check_pool(p, &format!("pft {} root fraction", i), *f);
        }
    }

    fn validate_soil(&self, p: &mut Vec<String>) {
        let layers = &self.soil.layers;
        if layers.is_empty() {
            p.push("soil column is empty".to_string());
            return;
        }
        if layers.len() > MAX_SOIL_LAYERS {
            p.push(format!(
                "{} soil layers exceed capacity {}",
                layers.len(),
                MAX_SOIL_LAYERS
            ));
        }
        if self.soil.count(Horizon::Mineral) == 0 {
            p.push("soil column has no mineral layer".to_string());
        }
        if layers.windows(2).any(|w| w[0].horizon > w[1].horizon) {
            p.push("soil horizons out of order".to_string());
        }
        if self.soil.litterfall_cn.len() != layers.len() {
            p.push(format!(
                "litterfall history covers {} layers, column has {}",
                self.soil.litterfall_cn.len(),
                layers.len()
            ));
        }
        for (i, layer) in layers.iter().enumerate() {
            let what = format!("soil layer {}", i);
            check_thickness(p, &what, layer.thickness);
            check_finite(p, &format!("{} temperature", what), layer.temperature);
            for (name, value) in [
                ("liquid", layer.liquid),
                ("ice", layer.ice),
                ("raw C", layer.raw_c),
                ("active C", layer.active_c),
                ("resistant C", layer.resistant_c),
                ("chemically resistant C", layer.chemically_resistant_c),
                ("organic N", layer.org_n),
                ("available N", layer.avail_n),
            ] {
                check_pool(p, &format!("{} {}", what, name), value);
            }
            if !(0.0..=1.0).contains(&layer.frozen_fraction) {
                p.push(format!(
                    "{} frozen fraction {} outside [0, 1]",
                    what, layer.frozen_fraction
                ));
            }
        }
    }

    /// Model-defined initial state of a cohort that has no history.
    ///
    /// Vegetation is seeded for the first `community_type % NUM_PFT + 1`
    /// PFTs; the column is one moss, one shallow and two deep organic
    /// layers over the standard mineral profile.
    #[must_use]
    pub fn cold_start(cohort: CohortId, community_type: u32) -> Self {
        let seeded = community_type as usize % NUM_PFT + 1;
        let cover = 1.0 / seeded as f64;

        let pfts = (0..NUM_PFT)
            .map(|i| {
                let on = i < seeded;
                let scale = if on { cover } else { 0.0 };
                PftState {
                    life_form: LifeForm {
                        vegetated: on,
                        woody: on && i % 3 == 0,
                        deciduous: on && i % 2 == 1,
                        non_vascular: on && i == seeded - 1 && seeded > 1,
                    },
                    cover: scale,
                    lai: scale,
                    age: 0,
                    leaf_c: 10.0 * scale,
                    stem_c: 50.0 * scale,
                    root_c: 20.0 * scale,
                    leaf_n: 0.4 * scale,
                    stem_n: 0.2 * scale,
                    root_n: 0.3 * scale,
                    labile_n: 0.05 * scale,
                    dead_c: 0.0,
                    dead_n: 0.0,
                    canopy_water: 0.0,
                    canopy_snow: 0.0,
                    phenology: Phenology {
                        foliage_max: scale,
                        optimum_temp: 15.0,
                        eet_max: 0.0,
                        unnormalized_leaf_max: 0.0,
                        growing_season_length: 0.0,
                        optimum_temp_history: vec![15.0; PHENOLOGY_HISTORY_YEARS],
                        eet_max_history: vec![0.0; PHENOLOGY_HISTORY_YEARS],
                        unnormalized_leaf_history: vec![0.0; PHENOLOGY_HISTORY_YEARS],
                        growing_season_history: vec![0.0; PHENOLOGY_HISTORY_YEARS],
                    },
                    root_fractions: if on {
                        vec![0.4, 0.3, 0.2, 0.1]
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();

        let organic = [
            (Horizon::Moss, 0.02, 0.5),
            (Horizon::ShallowOrganic, 0.06, 2.0),
            (Horizon::DeepOrganic, 0.1, 4.0),
            (Horizon::DeepOrganic, 0.1, 4.0),
        ];
        let mut layers: Vec<SoilLayer> = organic
            .iter()
            .map(|&(horizon, thickness, c)| SoilLayer {
                horizon,
                thickness,
                temperature: -1.0,
                liquid: 10.0 * thickness,
                ice: 0.0,
                frozen: FrozenState::Thawed,
                frozen_fraction: 0.0,
                texture: 0,
                age: 0.0,
                raw_c: c,
                active_c: c,
                resistant_c: c,
                chemically_resistant_c: 0.5 * c,
                org_n: 0.05 * c,
                avail_n: 0.01,
            })
            .collect();
        layers.extend(MINERAL_THICKNESSES.iter().map(|&thickness| SoilLayer {
            horizon: Horizon::Mineral,
            thickness,
            temperature: -2.0,
            liquid: 0.0,
            ice: 200.0 * thickness,
            frozen: FrozenState::Frozen,
            frozen_fraction: 1.0,
            texture: (community_type % 9) as TextureClass + 1,
            age: 0.0,
            raw_c: 0.0,
            active_c: 0.2,
            resistant_c: 0.5,
            chemically_resistant_c: 1.0,
            org_n: 0.1,
            avail_n: 0.001,
        }));
        let litterfall_cn = vec![[0.0; MONTHS_PER_YEAR]; layers.len()];

        let rock = [0.5, 1.0, 2.0, 4.0, 8.0]
            .iter()
            .map(|&thickness| RockLayer {
                thickness,
                temperature: -3.0,
            })
            .collect();

        Self {
            cohort,
            community_type,
            pfts,
            snow: SnowPack::default(),
            soil: SoilColumn {
                layers,
                litterfall_cn,
            },
            rock,
            fronts: Vec::new(),
            ground: GroundState {
                water_table: 0.5,
                ..GroundState::default()
            },
            debris: WoodyDebris::default(),
            disturbance: DisturbanceHistory::default(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ModelStateSnapshot {
        ModelStateSnapshot::cold_start(CohortId::new(0, 0), 4)
    }

    #[test]
    fn cold_start_is_valid() {
        for cmt in 0..12 {
            let s = ModelStateSnapshot::cold_start(CohortId::new(1, 2), cmt);
            assert_eq!(s.validate(), Ok(()), "cmt {}", cmt);
        }
    }

    #[test]
    fn cold_start_column_shape() {
        let s = state();
        assert_eq!(s.soil.count(Horizon::Moss), 1);
        assert_eq!(s.soil.count(Horizon::ShallowOrganic), 1);
        assert_eq!(s.soil.count(Horizon::DeepOrganic), 2);
        assert_eq!(s.soil.count(Horizon::Mineral), MINERAL_THICKNESSES.len());
        assert!(s.soil.layers.len() <= MAX_SOIL_LAYERS);
    }

    #[test]
    fn wrong_pft_count_rejected() {
        let mut s = state();
        s.pfts.pop();
        let reason = s.validate().expect_err("must fail");
        assert!(reason.contains("expected 10 PFTs"));
    }

    #[test]
    fn missing_mineral_layer_rejected() {
        let mut s = state();
        s.soil.layers.retain(|l| l.horizon != Horizon::Mineral);
        s.soil.litterfall_cn.truncate(s.soil.layers.len());
        let reason = s.validate().expect_err("must fail");
        assert!(reason.contains("no mineral layer"));
    }

    #[test]
    fn horizons_out_of_order_rejected() {
        let mut s = state();
        s.soil.layers.swap(0, 5);
        assert!(s.validate().is_err());
    }

    #[test]
    fn negative_pool_and_bad_fraction_rejected() {
        let mut s = state();
        s.pfts[0].leaf_c = -1.0;
        s.soil.layers[3].frozen_fraction = 1.5;
        let reason = s.validate().expect_err("must fail");
        assert!(reason.contains("pft 0 leaf C"));
        assert!(reason.contains("frozen fraction"));
    }

    #[test]
    fn litterfall_history_must_match_layers() {
        let mut s = state();
        s.soil.litterfall_cn.pop();
        assert!(s.validate().is_err());
    }

    #[test]
    fn fronts_must_increase_inside_column() {
        let mut s = state();
        s.fronts = vec![
            Front {
                kind: FrontKind::Freezing,
                depth: 0.3,
            },
            Front {
                kind: FrontKind::Thawing,
                depth: 0.2,
            },
        ];
        assert!(s.validate().is_err());

        s.fronts[1].depth = s.soil.depth() + 1.0;
        assert!(s.validate().is_err());

        s.fronts[1].depth = 0.5;
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn short_phenology_history_rejected() {
        let mut s = state();
        s.pfts[2].phenology.eet_max_history.pop();
        let reason = s.validate().expect_err("must fail");
        assert!(reason.contains("eet maximum history"));
    }
}
