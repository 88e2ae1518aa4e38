//! # CLI Command Implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tundra::config::RunConfig;
use tundra::io::{
    CONFIG_LOG_FILE, FAIL_LOG_FILE, JsonLinesSink, JsonTreeTrace, RUN_STATUS_FILE, StatusFile,
    append_fail_log,
};
use tundra::StageOverrides;
use tundra_core::storage::{read_restart_file, restart_file_cohorts};
use tundra_core::{
    Aggregates, BatchRunner, CalibrationTrace, CohortId, CohortSequencer, NullTrace,
    ProcessKernel, RedbSnapshotStore, RelaxationKernel, RestartSource, RunContext, RunPlan,
    RunStatus, SequencerOptions, TundraError,
};

/// Arguments of `tundra run`.
#[derive(Debug)]
pub struct RunArgs {
    pub file: PathBuf,
    pub stages: StageOverrides,
    pub workers: Option<usize>,
    pub resume: bool,
    pub no_output_cleanup: bool,
    pub cal_mode: bool,
    pub runmask: Option<PathBuf>,
    pub cells: Vec<CohortId>,
}

fn io_err(path: &Path, e: std::io::Error) -> TundraError {
    TundraError::IoError(format!("{}: {}", path.display(), e))
}

fn load_plan(file: &Path, overrides: &StageOverrides) -> Result<(RunConfig, RunPlan), TundraError> {
    let mut config = RunConfig::load(file)?;
    config.apply(overrides);
    let plan = config.stage_settings.resolve()?;
    Ok((config, plan))
}

// =============================================================================
// OUTPUT DIRECTORY
// =============================================================================

/// Create the output directory, emptying it first unless `keep` is set.
fn prepare_output_dir(dir: &Path, keep: bool) -> Result<(), TundraError> {
    if dir.exists() {
        let canonical = dir.canonicalize().map_err(|e| io_err(dir, e))?;
        if canonical.parent().is_none() {
            return Err(TundraError::Configuration(format!(
                "refusing to use '{}' as the output directory",
                dir.display()
            )));
        }
        if keep {
            tracing::warn!("Output cleanup skipped; keeping {}", dir.display());
        } else {
            tracing::info!("Cleaning output directory {}", dir.display());
            std::fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

/// Whether the previous contents of the output directory must survive.
/// A stage restarting from an explicit file may be reading from it.
fn keeps_output(args: &RunArgs, plan: &RunPlan) -> bool {
    if args.resume || args.no_output_cleanup {
        return true;
    }
    let explicit = plan
        .stages()
        .iter()
        .find(|d| matches!(d.restart_source, RestartSource::Explicit(_)));
    if let Some(d) = explicit {
        tracing::info!("{} restarts from a file; output cleanup disabled", d.kind);
        return true;
    }
    false
}

fn write_config_log(path: &Path, config: &RunConfig, plan: &RunPlan) -> Result<(), TundraError> {
    let log = serde_json::json!({
        "command_line": std::env::args().collect::<Vec<_>>(),
        "config": config,
        "plan": plan,
    });
    let text = serde_json::to_string_pretty(&log)
        .map_err(|e| TundraError::SerializationError(e.to_string()))?;
    std::fs::write(path, text).map_err(|e| io_err(path, e))
}

// =============================================================================
// RUN CONTROL
// =============================================================================

/// First Ctrl-C requests a stop at the next stage boundary; a second one
/// exits immediately.
fn spawn_stop_on_ctrl_c(context: Arc<RunContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            return;
        }
        tracing::warn!("Ctrl-C received");
        context.request_stop();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("Second Ctrl-C; exiting without waiting");
            std::process::exit(130);
        }
    })
}

/// Announce inter-stage pauses and release them from stdin: an empty line
/// resumes, `q` stops. If stdin closes, every later pause resumes by itself.
fn spawn_pause_console(context: Arc<RunContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        let mut announced = None;
        let mut stdin_open = true;

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => {
                        context.request_stop();
                    }
                    Ok(Some(_)) => {
                        context.resume();
                    }
                    Ok(None) | Err(_) => {
                        tracing::warn!("Console closed; pauses will resume automatically");
                        stdin_open = false;
                    }
                },
                _ = ticker.tick() => {
                    let paused = context.paused_stage();
                    if let Some(stage) = paused {
                        if !stdin_open {
                            context.resume();
                        } else if announced != Some(stage) {
                            println!(
                                "Paused after {}. Press Enter to continue, or q then Enter to stop.",
                                stage.name()
                            );
                        }
                    }
                    if paused.is_some() {
                        announced = paused;
                    }
                }
            }
        }
    })
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run the batch. Returns whether every requested cohort completed.
pub async fn cmd_run(args: RunArgs, json_mode: bool, verbose: bool) -> Result<bool, TundraError> {
    // Configuration errors abort here, before anything is touched.
    let (config, plan) = load_plan(&args.file, &args.stages)?;
    let kernel = RelaxationKernel::new(config.kernel)?;
    let mut mask = config.run_mask(args.runmask.as_deref())?;
    if !args.cells.is_empty() {
        mask = mask.restrict(&args.cells);
    }
    let dims = mask.dims();

    let keep = keeps_output(&args, &plan);
    let output_dir = config.io.output_dir.clone();
    prepare_output_dir(&output_dir, keep)?;
    write_config_log(&output_dir.join(CONFIG_LOG_FILE), &config, &plan)?;

    let trace: Box<dyn CalibrationTrace> = match (args.cal_mode, mask.enabled_cells().first()) {
        (true, Some(&cell)) => {
            if mask.enabled_cells().len() > 1 {
                tracing::warn!("Calibration mode traces only the first enabled cell {}", cell);
            }
            Box::new(JsonTreeTrace::create(
                &config.calibration_io.tree_root(),
                cell,
                config.io.output_monthly,
            )?)
        }
        _ => Box::new(NullTrace),
    };
    let policy = config.output_policy();
    let written = policy.stages().filter(|k| plan.get(*k).is_some());
    let sink = JsonLinesSink::create(&output_dir, written, keep)?;
    let store = RedbSnapshotStore::open(&output_dir, plan.kinds())?;
    let options = SequencerOptions {
        resume: args.resume,
        cell_time_limit: config.cell_time_limit(),
        output: policy,
    };
    let workers = args.workers.unwrap_or(config.general.workers);

    let context = Arc::new(RunContext::new(plan.inter_stage_pause()));
    let mut controls = vec![spawn_stop_on_ctrl_c(Arc::clone(&context))];
    if context.inter_stage_pause() {
        controls.push(spawn_pause_console(Arc::clone(&context)));
    }

    let batch_context = Arc::clone(&context);
    let batch = tokio::task::spawn_blocking(move || {
        let sequencer = CohortSequencer::new(&plan, &kernel, &store, &batch_context)
            .with_sink(&sink)
            .with_trace(trace.as_ref())
            .with_options(options);
        BatchRunner::new(sequencer, workers).run(&mask)
    });
    let report = batch
        .await
        .map_err(|e| TundraError::WorkerPool(format!("batch task failed: {}", e)))??;
    for control in controls {
        control.abort();
    }

    let status = StatusFile::new(&config.general.run_name, dims, &report);
    status.write(&output_dir.join(RUN_STATUS_FILE))?;
    let failures = append_fail_log(&output_dir.join(FAIL_LOG_FILE), &report)?;
    if failures > 0 {
        tracing::warn!(
            "{} cohort failures appended to {}",
            failures,
            output_dir.join(FAIL_LOG_FILE).display()
        );
    }

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).unwrap_or_default()
        );
    } else {
        println!("Run finished: {} cohorts", report.cohorts.len());
        for r in &report.cohorts {
            let run_status = RunStatus::of(r);
            if verbose || run_status != RunStatus::Success {
                let completed: Vec<_> = r.completed().map(|k| k.code()).collect();
                println!(
                    "  {:<12} {:<10} [{}] {:.2}s",
                    r.cohort.to_string(),
                    run_status.to_string(),
                    completed.join(" "),
                    r.elapsed.as_secs_f64()
                );
                if let Some((stage, e)) = r.failure() {
                    println!("      {}: {}", stage.code(), e);
                }
            }
        }
        let tally: Vec<String> = report
            .tally()
            .into_iter()
            .map(|(s, n)| format!("{} {}", s, n))
            .collect();
        println!("  {}", tally.join(", "));
        println!("  Output: {}", output_dir.display());
    }

    Ok(report.is_success())
}

// =============================================================================
// PLAN COMMAND
// =============================================================================

/// Print the resolved stage plan.
pub fn cmd_plan(file: &Path, overrides: &StageOverrides, json_mode: bool) -> Result<(), TundraError> {
    let (config, plan) = load_plan(file, overrides)?;
    let kernel = RelaxationKernel::new(config.kernel)?;
    let fri = kernel.fire_return_interval(CohortId::new(0, 0));

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&plan).unwrap_or_default());
        return Ok(());
    }

    println!(
        "Stage plan: {} stages, inter-stage pause {}, restart mode {:?}",
        plan.stages().len(),
        if plan.inter_stage_pause() { "on" } else { "off" },
        config.stage_settings.restart_mode
    );
    for (i, d) in plan.stages().iter().enumerate() {
        let initial = match (&d.restart_source, plan.predecessor(d.kind)) {
            (RestartSource::Explicit(path), _) => format!("file {}", path.display()),
            (RestartSource::Chained, Some(prev)) => format!("chained from {}", prev.code()),
            (RestartSource::Chained, None) => "cold start".to_string(),
        };
        let effective = d.effective_years(fri);
        let years = if effective != d.requested_years {
            format!("{} years (runs {} with fire cycle)", d.requested_years, effective)
        } else {
            format!("{} years", d.requested_years)
        };
        println!("  {}. {:<3} {:<12} {}", i + 1, d.kind.code(), d.kind.name(), years);
        println!("       modules:     {}", d.modules);
        println!("       initial:     {}", initial);
        if let Some(c) = &d.convergence {
            println!(
                "       convergence: window {}, tolerance {:e}, after {} years",
                c.window, c.tolerance, c.min_years
            );
        }
    }
    Ok(())
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// List the cells of a restart file, or decode one of them.
pub fn cmd_inspect(restart: &Path, cell: Option<CohortId>, json_mode: bool) -> Result<(), TundraError> {
    let Some(cell) = cell else {
        let cohorts = restart_file_cohorts(restart)?;
        if json_mode {
            println!("{}", serde_json::to_string_pretty(&cohorts).unwrap_or_default());
        } else {
            println!("{}: {} cells", restart.display(), cohorts.len());
            for c in cohorts {
                println!("  {}", c);
            }
        }
        return Ok(());
    };

    let state = read_restart_file(restart, cell)?;
    let agg = Aggregates::from_state(&state);

    if json_mode {
        let output = serde_json::json!({
            "aggregates": agg,
            "state": state,
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        return Ok(());
    }

    println!("Cohort {} (community type {})", cell, state.community_type);
    println!();
    println!("Aggregates:");
    println!("  Vegetation C:  {:>12.3} g/m2", agg.veg_c);
    println!("  Vegetation N:  {:>12.3} g/m2", agg.veg_n);
    println!("  Soil C:        {:>12.3} g/m2", agg.soil_c);
    println!("  Soil N:        {:>12.3} g/m2", agg.soil_n);
    println!("  Available N:   {:>12.3} g/m2", agg.avail_n);
    println!("  Water:         {:>12.3} kg/m2", agg.water);
    println!("  Soil temp:     {:>12.3} degC", agg.soil_temp);
    println!();
    println!(
        "Snow: {} layers, {:.3} m",
        state.snow.layers.len(),
        state.snow.layers.iter().map(|l| l.thickness).sum::<f64>()
    );
    println!(
        "Soil column: {} layers, {:.3} m, water table {:.3} m",
        state.soil.layers.len(),
        state.soil.depth(),
        state.ground.water_table
    );
    println!(
        "  {:>3} {:<16} {:>8} {:>8} {:>7} {:>12}",
        "#", "horizon", "dz (m)", "T (C)", "frozen", "soil C"
    );
    for (i, l) in state.soil.layers.iter().enumerate() {
        println!(
            "  {:>3} {:<16} {:>8.3} {:>8.2} {:>7.2} {:>12.3}",
            i,
            format!("{:?}", l.horizon),
            l.thickness,
            l.temperature,
            l.frozen_fraction,
            l.soil_c()
        );
    }
    println!("Rock: {} layers", state.rock.len());
    for f in &state.fronts {
        println!("Front: {:?} at {:.3} m", f.kind, f.depth);
    }
    println!(
        "Disturbance: {} years since fire, {} years since disturbance",
        state.disturbance.years_since_fire, state.disturbance.years_since_disturbance
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_empties_unless_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).expect("mkdir");
        std::fs::write(out.join("stale.txt"), b"x").expect("write");

        prepare_output_dir(&out, true).expect("keep");
        assert!(out.join("stale.txt").exists());

        prepare_output_dir(&out, false).expect("clean");
        assert!(out.is_dir());
        assert!(!out.join("stale.txt").exists());
    }

    fn run_args(file: PathBuf, stages: StageOverrides) -> RunArgs {
        RunArgs {
            file,
            stages,
            workers: Some(1),
            resume: false,
            no_output_cleanup: false,
            cal_mode: false,
            runmask: None,
            cells: Vec::new(),
        }
    }

    #[tokio::test]
    async fn explicit_restart_inside_output_dir_survives_cleanup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        let restart = out.join("restart-eq.redb");

        let eq_only = dir.path().join("eq.toml");
        std::fs::write(
            &eq_only,
            format!(
                "[io]\noutput_dir = '{}'\n\n[stage_settings.eq]\nyears = 2\n",
                out.display()
            ),
        )
        .expect("write");
        let first = cmd_run(run_args(eq_only, StageOverrides::default()), true, false)
            .await
            .expect("first run");
        assert!(first);
        assert!(restart.is_file());

        let sp_from_file = dir.path().join("sp.toml");
        std::fs::write(
            &sp_from_file,
            format!(
                "[io]\noutput_dir = '{}'\n\n[stage_settings.eq]\nyears = 2\n\n\
                 [stage_settings.sp]\nyears = 2\nrestart_from = '{}'\n",
                out.display(),
                restart.display()
            ),
        )
        .expect("write");
        let overrides = StageOverrides {
            eq_yrs: Some(0),
            ..StageOverrides::default()
        };
        let second = cmd_run(run_args(sp_from_file, overrides), true, false)
            .await
            .expect("second run");
        assert!(second);
        assert!(restart.is_file());
        assert!(out.join("restart-sp.redb").is_file());
    }

    #[test]
    fn missing_output_dir_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("a").join("b");
        prepare_output_dir(&out, false).expect("create");
        assert!(out.is_dir());
    }
}
