//! Run command implementation for the framepipe CLI.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use framepipe_core::{ConfigOverrides, ExecutionMode, ExecutorKind, Interface, PipelineConfig, RunStatus};

use crate::colors;

/// Exit code for a run stopped by SIGINT (128 + SIGINT).
pub const INTERRUPTED_EXIT: u8 = 130;

pub struct RunArgs {
    pub source: String,
    pub destination: String,
    pub config: Option<String>,
    pub mode: Option<ExecutionMode>,
    pub executor: Option<ExecutorKind>,
    pub max_parallel: Option<usize>,
    pub cost_per_task: Option<usize>,
    pub worker: Option<String>,
    pub quiet: bool,
    pub overwrite: bool,
}

/// Execute a pipeline run.
pub fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let start = Instant::now();

    let base = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => PipelineConfig::default(),
    };
    let overrides = ConfigOverrides {
        mode: args.mode,
        kind: args.executor,
        max_parallel: args.max_parallel,
        cost_per_task: args.cost_per_task,
        worker_path: args.worker,
        overwrite: args.overwrite.then_some(true),
        progress: args.quiet.then_some(false),
    };
    let interface = Interface::configure(base, overrides)?;

    let executor = &interface.config().executor;
    eprintln!(
        "{}Running{} {} {}({} executor, {} mode){}",
        colors::BOLD,
        colors::RESET,
        args.source,
        colors::DIM,
        executor.kind,
        executor.mode,
        colors::RESET
    );

    let report = interface.run(&args.source, &args.destination)?;
    let elapsed = start.elapsed();

    match report.status {
        RunStatus::Completed => {
            println!(
                "{}Completed{} {} items ({} frames, {} skipped) in {:.2}s",
                colors::GREEN,
                colors::RESET,
                report.items.len(),
                report.frames(),
                report.skipped,
                elapsed.as_secs_f64()
            );
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Interrupted => {
            eprintln!("{}Interrupted{}", colors::YELLOW, colors::RESET);
            Ok(ExitCode::from(INTERRUPTED_EXIT))
        }
        RunStatus::Failed => {
            eprintln!("{}Failed{}", colors::RED, colors::RESET);
            Ok(ExitCode::FAILURE)
        }
    }
}
