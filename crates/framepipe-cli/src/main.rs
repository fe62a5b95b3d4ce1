//! framepipe CLI - parallel frame pipeline.

mod colors;
mod run;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use framepipe_core::{ExecutionMode, ExecutorKind};

#[derive(Parser)]
#[command(name = "framepipe")]
#[command(about = "Run a frame analysis pipeline over videos, image sequences and stills")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a file, a directory tree or a capture device
    Run {
        /// Source path, or a device index such as `0`
        source: String,

        /// Destination path (a directory for batch sources)
        destination: String,

        /// JSON pipeline configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Level that runs in parallel: batch, frames or none
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Parallel backend: thread, process or none
        #[arg(long)]
        executor: Option<ExecutorKind>,

        /// Parallel units (threads, or CPUs for the process pool)
        #[arg(short = 'j', long)]
        max_parallel: Option<usize>,

        /// Units one process task consumes
        #[arg(long)]
        cost_per_task: Option<usize>,

        /// Path to the framepipe-worker binary
        #[arg(long)]
        worker: Option<String>,

        /// Disable progress bars
        #[arg(short, long)]
        quiet: bool,

        /// Overwrite existing results
        #[arg(long)]
        overwrite: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Run {
            source,
            destination,
            config,
            mode,
            executor,
            max_parallel,
            cost_per_task,
            worker,
            quiet,
            overwrite,
        } => run::execute(run::RunArgs {
            source,
            destination,
            config,
            mode,
            executor,
            max_parallel,
            cost_per_task,
            worker,
            quiet,
            overwrite,
        }),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            // Format framepipe-core errors with recovery hints
            let message = match err.downcast_ref::<framepipe_core::Error>() {
                Some(core) => core.with_hint(),
                None => format!("{:#}", err),
            };
            eprintln!("{}error:{} {}", colors::RED, colors::RESET, message);
            if err
                .downcast_ref::<framepipe_core::Error>()
                .is_some_and(|e| e.is_interrupt())
            {
                ExitCode::from(run::INTERRUPTED_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
