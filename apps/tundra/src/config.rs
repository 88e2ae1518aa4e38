//! # Run Configuration
//!
//! A run is described by one configuration file, TOML or JSON by
//! extension, with the sections `general`, `io`, `calibration_io`,
//! `stage_settings` and `kernel`. Command-line overrides are applied to
//! the parsed file before the stage plan is resolved.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tundra_core::{
    CohortId, OutputPolicy, RelaxationParams, RunMask, StageKind, StageSettings, TundraError,
};

/// Maximum configuration or run mask file size (16 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 16 * 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Free-form label echoed into the run status file.
    pub run_name: String,
    /// Worker threads; 0 uses every available CPU.
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IoConfig {
    pub output_dir: PathBuf,
    /// JSON run mask; without one the run is a single cell.
    pub runmask_file: Option<PathBuf>,
    pub output_monthly: bool,
    pub output_eq: bool,
    pub output_sp: bool,
    pub output_tr: bool,
    pub output_sc: bool,
    /// Wall-clock limit per cohort across all stages, in seconds.
    pub cell_timelimit: Option<u64>,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            runmask_file: None,
            output_monthly: false,
            output_eq: false,
            output_sp: false,
            output_tr: true,
            output_sc: true,
            cell_timelimit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationIoConfig {
    pub caldata_tree_loc: PathBuf,
    /// Suffix keeping the trees of parallel runs apart.
    pub unique_pid_tag: String,
}

impl Default for CalibrationIoConfig {
    fn default() -> Self {
        Self {
            caldata_tree_loc: std::env::temp_dir(),
            unique_pid_tag: String::new(),
        }
    }
}

impl CalibrationIoConfig {
    /// `<caldata_tree_loc>/tundra[-<pid>]/calibration`
    #[must_use]
    pub fn tree_root(&self) -> PathBuf {
        let name = if self.unique_pid_tag.is_empty() {
            "tundra".to_string()
        } else {
            format!("tundra-{}", self.unique_pid_tag)
        };
        self.caldata_tree_loc.join(name).join("calibration")
    }
}

/// A complete run configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub general: GeneralConfig,
    pub io: IoConfig,
    pub calibration_io: CalibrationIoConfig,
    pub stage_settings: StageSettings,
    pub kernel: RelaxationParams,
}

// =============================================================================
// OVERRIDES
// =============================================================================

/// Stage overrides shared by every command that resolves a plan.
///
/// A year count of 0 disables the stage; a positive count enables it.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOverrides {
    /// Pre-run years
    #[arg(long = "pr-yrs", allow_negative_numbers = true)]
    pub pr_yrs: Option<i64>,

    /// Equilibrium years
    #[arg(long = "eq-yrs", allow_negative_numbers = true)]
    pub eq_yrs: Option<i64>,

    /// Spin-up years
    #[arg(long = "sp-yrs", allow_negative_numbers = true)]
    pub sp_yrs: Option<i64>,

    /// Transient years
    #[arg(long = "tr-yrs", allow_negative_numbers = true)]
    pub tr_yrs: Option<i64>,

    /// Scenario years
    #[arg(long = "sc-yrs", allow_negative_numbers = true)]
    pub sc_yrs: Option<i64>,

    /// Pause the whole batch between stages until resumed
    #[arg(long)]
    pub inter_stage_pause: bool,
}

impl StageOverrides {
    fn years(&self) -> [(StageKind, Option<i64>); 5] {
        [
            (StageKind::PreRun, self.pr_yrs),
            (StageKind::Equilibrium, self.eq_yrs),
            (StageKind::SpinUp, self.sp_yrs),
            (StageKind::Transient, self.tr_yrs),
            (StageKind::Scenario, self.sc_yrs),
        ]
    }
}

// =============================================================================
// LOADING
// =============================================================================

fn read_limited(path: &Path) -> Result<String, TundraError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        TundraError::IoError(format!("Cannot read '{}': {}", path.display(), e))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(TundraError::Configuration(format!(
            "'{}' is {} bytes, more than the allowed {}",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| TundraError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

impl RunConfig {
    /// Load a `.toml` or `.json` configuration file.
    pub fn load(path: &Path) -> Result<Self, TundraError> {
        let text = read_limited(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let config: Self = match extension.as_deref() {
            Some("toml") => toml::from_str(&text).map_err(|e| {
                TundraError::Configuration(format!("{}: {}", path.display(), e))
            })?,
            Some("json") => serde_json::from_str(&text).map_err(|e| {
                TundraError::Configuration(format!("{}: {}", path.display(), e))
            })?,
            _ => {
                return Err(TundraError::Configuration(format!(
                    "'{}' must be a .toml or .json file",
                    path.display()
                )));
            }
        };
        tracing::debug!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    /// Apply command-line overrides to the stage settings.
    pub fn apply(&mut self, overrides: &StageOverrides) {
        for (kind, years) in overrides.years() {
            if let Some(years) = years {
                tracing::info!("Command line sets {} years to {}", kind.code(), years);
                self.stage_settings.override_years(kind, years);
            }
        }
        if overrides.inter_stage_pause {
            self.stage_settings.inter_stage_pause = true;
        }
    }

    #[must_use]
    pub fn output_policy(&self) -> OutputPolicy {
        let io = &self.io;
        let stages = [
            (StageKind::Equilibrium, io.output_eq),
            (StageKind::SpinUp, io.output_sp),
            (StageKind::Transient, io.output_tr),
            (StageKind::Scenario, io.output_sc),
        ]
        .into_iter()
        .filter_map(|(kind, on)| on.then_some(kind));
        OutputPolicy::new(io.output_monthly, stages)
    }

    #[must_use]
    pub fn cell_time_limit(&self) -> Option<Duration> {
        self.io.cell_timelimit.map(Duration::from_secs)
    }

    /// The run mask named by `override_path`, else by `io.runmask_file`,
    /// else a single enabled cell.
    pub fn run_mask(&self, override_path: Option<&Path>) -> Result<RunMask, TundraError> {
        match override_path.or(self.io.runmask_file.as_deref()) {
            Some(path) => load_run_mask(path),
            None => Ok(RunMask::single_cell()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaskFile {
    Rows(Vec<Vec<i64>>),
    Table { run: Vec<Vec<i64>> },
}

/// Read a JSON run mask: either a bare array of rows or `{"run": [...]}`.
/// Non-zero entries are enabled.
pub fn load_run_mask(path: &Path) -> Result<RunMask, TundraError> {
    let text = read_limited(path)?;
    let file: MaskFile = serde_json::from_str(&text).map_err(|e| {
        TundraError::Configuration(format!("run mask {}: {}", path.display(), e))
    })?;
    let rows = match file {
        MaskFile::Rows(rows) | MaskFile::Table { run: rows } => rows,
    };
    RunMask::from_rows(rows)
}

/// Parse `ROW,COL`.
pub fn parse_cell(s: &str) -> Result<CohortId, String> {
    let (row, col) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got '{}'", s))?;
    let row = row
        .trim()
        .parse()
        .map_err(|e| format!("bad row in '{}': {}", s, e))?;
    let col = col
        .trim()
        .parse()
        .map_err(|e| format!("bad column in '{}': {}", s, e))?;
    Ok(CohortId::new(row, col))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_parse() {
        assert_eq!(parse_cell("3,14"), Ok(CohortId::new(3, 14)));
        assert_eq!(parse_cell(" 0 , 2 "), Ok(CohortId::new(0, 2)));
        assert!(parse_cell("3").is_err());
        assert!(parse_cell("a,1").is_err());
        assert!(parse_cell("1,-1").is_err());
    }

    #[test]
    fn pid_tag_names_the_tree() {
        let mut cal = CalibrationIoConfig {
            caldata_tree_loc: PathBuf::from("/tmp/cal"),
            unique_pid_tag: String::new(),
        };
        assert_eq!(cal.tree_root(), PathBuf::from("/tmp/cal/tundra/calibration"));
        cal.unique_pid_tag = "23".into();
        assert_eq!(
            cal.tree_root(),
            PathBuf::from("/tmp/cal/tundra-23/calibration")
        );
    }

    #[test]
    fn output_policy_follows_flags() {
        let mut config = RunConfig::default();
        config.io.output_eq = true;
        config.io.output_tr = false;
        let policy = config.output_policy();
        assert!(policy.writes(StageKind::Equilibrium));
        assert!(!policy.writes(StageKind::Transient));
        assert!(policy.writes(StageKind::Scenario));
        assert!(!policy.writes(StageKind::PreRun));
    }

    #[test]
    fn overrides_apply_before_resolution() {
        let mut config = RunConfig::default();
        config.apply(&StageOverrides {
            eq_yrs: Some(20),
            tr_yrs: Some(5),
            inter_stage_pause: true,
            ..StageOverrides::default()
        });
        let plan = config.stage_settings.resolve().expect("plan");
        assert_eq!(
            plan.kinds().collect::<Vec<_>>(),
            vec![StageKind::Equilibrium, StageKind::Transient]
        );
        assert!(plan.inter_stage_pause());
    }
}
