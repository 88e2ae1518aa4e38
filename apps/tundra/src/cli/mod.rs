//! # Tundra CLI Module
//!
//! ## Available Commands
//!
//! - `run` - Run every enabled cohort through the resolved stage plan
//! - `plan` - Print the resolved stage plan without running it
//! - `inspect` - Decode snapshots from a restart file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tundra::StageOverrides;
use tundra::config::parse_cell;
use tundra_core::{CohortId, TundraError};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tundra - multi-stage ecosystem run controller
///
/// Runs the pre-run, equilibrium, spin-up, transient and scenario stages
/// of every enabled grid cell, carrying each cell's state from one stage
/// to the next through restart files.
#[derive(Parser, Debug)]
#[command(name = "tundra")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the simulation
    Run {
        /// Run configuration file (.toml or .json)
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        stages: StageOverrides,

        /// Worker threads (0 = all CPUs); overrides general.workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep existing restart files and skip stages already completed
        #[arg(long)]
        resume: bool,

        /// Do not empty the output directory before running
        #[arg(long)]
        no_output_cleanup: bool,

        /// Write the calibration JSON tree for the first enabled cell
        #[arg(long)]
        cal_mode: bool,

        /// Run mask file (JSON); overrides io.runmask_file
        #[arg(long)]
        runmask: Option<PathBuf>,

        /// Only run this cell (repeatable)
        #[arg(long = "cell", value_name = "ROW,COL", value_parser = parse_cell)]
        cells: Vec<CohortId>,
    },

    /// Print the resolved stage plan
    Plan {
        /// Run configuration file (.toml or .json)
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        stages: StageOverrides,
    },

    /// Decode snapshots from a restart file
    Inspect {
        /// Restart file (restart-<stage>.redb)
        #[arg(short, long)]
        restart: PathBuf,

        /// Cell to decode; without it, list the cells in the file
        #[arg(long, value_name = "ROW,COL", value_parser = parse_cell)]
        cell: Option<CohortId>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments. `Ok(false)` means the command ran
/// but not every requested cohort completed.
pub async fn execute(cli: Cli) -> Result<bool, TundraError> {
    let json_mode = cli.json_mode;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Run {
            file,
            stages,
            workers,
            resume,
            no_output_cleanup,
            cal_mode,
            runmask,
            cells,
        } => {
            let args = RunArgs {
                file,
                stages,
                workers,
                resume,
                no_output_cleanup,
                cal_mode,
                runmask,
                cells,
            };
            cmd_run(args, json_mode, verbose).await
        }
        Commands::Plan { file, stages } => cmd_plan(&file, &stages, json_mode).map(|()| true),
        Commands::Inspect { restart, cell } => {
            cmd_inspect(&restart, cell, json_mode).map(|()| true)
        }
    }
}
