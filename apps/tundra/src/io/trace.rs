//! # Calibration JSON Tree
//!
//! Per-timestep state dumps for interactive calibration, written as
//! `monthly/NNNNNNN.json` (index `year * 12 + month`) and
//! `yearly/NNNNN.json` under the calibration root. Year indices restart at
//! every stage, so each stage overwrites the files of the one before.
//!
//! Only one cohort is traced; hooks for any other cohort are ignored.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tundra_core::primitives::MONTHS_PER_YEAR;
use tundra_core::state::{Horizon, SoilLayer};
use tundra_core::{
    Aggregates, CalibrationTrace, CohortId, ModelStateSnapshot, StageKind, TimeStep, TundraError,
};

#[derive(Serialize)]
struct LayerDump {
    horizon: Horizon,
    thickness: f64,
    temperature: f64,
    liquid: f64,
    ice: f64,
    frozen_fraction: f64,
    soil_c: f64,
    org_n: f64,
    avail_n: f64,
}

impl From<&SoilLayer> for LayerDump {
    fn from(l: &SoilLayer) -> Self {
        Self {
            horizon: l.horizon,
            thickness: l.thickness,
            temperature: l.temperature,
            liquid: l.liquid,
            ice: l.ice,
            frozen_fraction: l.frozen_fraction,
            soil_c: l.soil_c(),
            org_n: l.org_n,
            avail_n: l.avail_n,
        }
    }
}

#[derive(Serialize)]
struct StepDump<'a> {
    cohort: CohortId,
    stage: &'a str,
    year: u32,
    month: Option<u8>,
    community_type: u32,
    aggregates: Aggregates,
    lai: Vec<f64>,
    snow_layers: usize,
    water_table: f64,
    years_since_fire: u32,
    layers: Vec<LayerDump>,
}

impl<'a> StepDump<'a> {
    fn new(step: &'a TimeStep, month: Option<u8>, state: &ModelStateSnapshot) -> Self {
        Self {
            cohort: step.cohort,
            stage: step.stage.code(),
            year: step.year,
            month,
            community_type: state.community_type,
            aggregates: Aggregates::from_state(state),
            lai: state.pfts.iter().map(|p| p.lai).collect(),
            snow_layers: state.snow.layers.len(),
            water_table: state.ground.water_table,
            years_since_fire: state.disturbance.years_since_fire,
            layers: state.soil.layers.iter().map(LayerDump::from).collect(),
        }
    }
}

#[derive(Debug)]
pub struct JsonTreeTrace {
    cohort: CohortId,
    monthly_dir: PathBuf,
    yearly_dir: PathBuf,
    /// Monthly files are written only when monthly output is on.
    monthly: bool,
}

impl JsonTreeTrace {
    /// Clear and recreate the tree under `root`.
    pub fn create(root: &Path, cohort: CohortId, monthly: bool) -> Result<Self, TundraError> {
        let io_err = |e: std::io::Error| TundraError::IoError(format!("{}: {}", root.display(), e));
        if root.exists() {
            std::fs::remove_dir_all(root).map_err(io_err)?;
        }
        let monthly_dir = root.join("monthly");
        let yearly_dir = root.join("yearly");
        std::fs::create_dir_all(&monthly_dir).map_err(io_err)?;
        std::fs::create_dir_all(&yearly_dir).map_err(io_err)?;
        tracing::info!("Calibration tree for cohort {} at {}", cohort, root.display());
        Ok(Self {
            cohort,
            monthly_dir,
            yearly_dir,
            monthly,
        })
    }

    fn write(&self, path: PathBuf, dump: &StepDump<'_>) {
        let result = serde_json::to_vec_pretty(dump)
            .map_err(|e| e.to_string())
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!("Cannot write calibration file {}: {}", path.display(), e);
        }
    }
}

#[must_use]
pub fn monthly_file_name(year: u32, month: u8) -> String {
    format!("{:07}.json", year as u64 * MONTHS_PER_YEAR as u64 + month as u64)
}

#[must_use]
pub fn yearly_file_name(year: u32) -> String {
    format!("{:05}.json", year)
}

impl CalibrationTrace for JsonTreeTrace {
    fn stage_start(&self, cohort: CohortId, stage: StageKind, initial: &ModelStateSnapshot) {
        if cohort == self.cohort {
            tracing::info!(
                "Calibration: {} starts with {:.1} g/m2 vegetation C",
                stage.name(),
                Aggregates::from_state(initial).veg_c
            );
        }
    }

    fn monthly(&self, step: &TimeStep, state: &ModelStateSnapshot) {
        if self.monthly && step.cohort == self.cohort {
            let path = self.monthly_dir.join(monthly_file_name(step.year, step.month));
            self.write(path, &StepDump::new(step, Some(step.month), state));
        }
    }

    fn yearly(&self, step: &TimeStep, state: &ModelStateSnapshot) {
        if step.cohort == self.cohort {
            let path = self.yearly_dir.join(yearly_file_name(step.year));
            self.write(path, &StepDump::new(step, None, state));
        }
    }

    fn stage_end(
        &self,
        cohort: CohortId,
        stage: StageKind,
        years_run: u32,
        _terminal: &ModelStateSnapshot,
    ) {
        if cohort == self.cohort {
            tracing::info!("Calibration: {} ended after {} years", stage.name(), years_run);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(monthly_file_name(0, 0), "0000000.json");
        assert_eq!(monthly_file_name(2, 3), "0000027.json");
        assert_eq!(yearly_file_name(41), "00041.json");
    }

    #[test]
    fn writes_only_the_traced_cohort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("tundra").join("calibration");
        let traced = CohortId::new(1, 1);
        let trace = JsonTreeTrace::create(&root, traced, true).expect("trace");

        let state = ModelStateSnapshot::cold_start(traced, 4);
        let step = TimeStep {
            cohort: traced,
            stage: StageKind::Equilibrium,
            year: 1,
            month: 11,
        };
        trace.monthly(&step, &state);
        trace.yearly(&step, &state);
        let other = TimeStep {
            cohort: CohortId::new(0, 0),
            year: 2,
            ..step
        };
        trace.yearly(&other, &state);

        assert!(root.join("monthly").join("0000023.json").exists());
        assert!(root.join("yearly").join("00001.json").exists());
        assert!(!root.join("yearly").join("00002.json").exists());

        let text = std::fs::read_to_string(root.join("yearly").join("00001.json")).expect("read");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["stage"], "eq");
        assert_eq!(value["month"], serde_json::Value::Null);
    }

    #[test]
    fn create_clears_previous_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("calibration");
        std::fs::create_dir_all(root.join("yearly")).expect("mkdir");
        std::fs::write(root.join("yearly").join("00099.json"), b"{}").expect("write");

        JsonTreeTrace::create(&root, CohortId::new(0, 0), false).expect("trace");
        assert!(!root.join("yearly").join("00099.json").exists());
        assert!(root.join("monthly").is_dir());
    }
}
