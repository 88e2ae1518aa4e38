//! # tundra
//!
//! Library half of the `tundra` binary: run configuration loading and
//! the file-backed output, calibration and status writers. The command
//! line lives in the binary.

pub mod config;
pub mod io;

pub use config::{RunConfig, StageOverrides};
