//! framepipe worker process.
//!
//! Spawned by the process pool. Speaks the IPC protocol on stdin/stdout, so
//! all logging goes to stderr.

use framepipe_core::Components;

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("framepipe-worker {} starting", std::process::id());
    framepipe_core::ipc::serve(Components::builtin())?;
    Ok(())
}
