//! # File-Backed Collaborators
//!
//! Implementations of the core's output and calibration seams that write
//! to the output directory, plus the run status files.

mod sink;
mod status;
mod trace;

pub use sink::{JsonLinesSink, output_file_name};
pub use status::{FAIL_LOG_FILE, RUN_STATUS_FILE, StatusFile, append_fail_log};
pub use trace::{JsonTreeTrace, monthly_file_name, yearly_file_name};

/// Configuration echo written at the start of every run.
pub const CONFIG_LOG_FILE: &str = "config_log.json";
