//! Cohort-level aggregates delivered to the output writer and tracked for
//! convergence.

use super::ModelStateSnapshot;
use serde::{Deserialize, Serialize};

/// Summed pools of one cohort at one time step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    /// Vegetation carbon (g/m2).
    pub veg_c: f64,
    /// Vegetation structural and labile nitrogen (g/m2).
    pub veg_n: f64,
    /// Soil organic carbon including woody debris (g/m2).
    pub soil_c: f64,
    /// Soil organic nitrogen including woody debris (g/m2).
    pub soil_n: f64,
    /// Available inorganic nitrogen (g/m2).
    pub avail_n: f64,
    /// Liquid plus frozen water in canopy, snow and soil (kg/m2).
    pub water: f64,
    /// Thickness-weighted mean soil temperature (degC).
    pub soil_temp: f64,
}

impl Aggregates {
    #[must_use]
    pub fn from_state(state: &ModelStateSnapshot) -> Self {
        let veg_c = state.pfts.iter().map(|p| p.veg_c()).sum();
        let veg_n = state.pfts.iter().map(|p| p.veg_n()).sum();

        let layers = &state.soil.layers;
        let soil_c = layers.iter().map(|l| l.soil_c()).sum::<f64>() + state.debris.c;
        let soil_n = layers.iter().map(|l| l.org_n).sum::<f64>() + state.debris.n;
        let avail_n = layers.iter().map(|l| l.avail_n).sum();

        let canopy: f64 = state
            .pfts
            .iter()
            .map(|p| p.canopy_water + p.canopy_snow)
            .sum();
        let snow: f64 = state.snow.layers.iter().map(|l| l.liquid + l.ice).sum();
        let soil: f64 = layers.iter().map(|l| l.liquid + l.ice).sum();

        let depth = state.soil.depth();
        let soil_temp = if depth > 0.0 {
            layers
                .iter()
                .map(|l| l.temperature * l.thickness)
                .sum::<f64>()
                / depth
        } else {
            0.0
        };

        Self {
            veg_c,
            veg_n,
            soil_c,
            soil_n,
            avail_n,
            water: canopy + snow + state.snow.extra_mass + soil,
            soil_temp,
        }
    }

    /// Ecosystem nitrogen: vegetation, soil organic and available.
    #[must_use]
    pub fn total_n(&self) -> f64 {
        self.veg_n + self.soil_n + self.avail_n
    }
}
