//! Worker process management for the process pool.
//!
//! Provides `WorkerHandle` for spawning and talking to one `framepipe-worker`
//! process, and `WorkerKillHandle` for killing it from another thread.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::RunnerHooks;
use crate::execute::{LocalCall, MethodResult, RemoteInit};

use super::protocol::{WorkerCommand, WorkerResponse, read_message, write_message};

/// Environment variable overriding the worker binary location.
pub const WORKER_PATH_ENV: &str = "FRAMEPIPE_WORKER_PATH";

const WORKER_NAME: &str = if cfg!(windows) {
    "framepipe-worker.exe"
} else {
    "framepipe-worker"
};

/// Handle to a worker process.
pub struct WorkerHandle {
    /// The child process.
    child: Child,
    /// Buffered stdin writer.
    stdin: BufWriter<std::process::ChildStdin>,
    /// Buffered stdout reader.
    stdout: BufReader<std::process::ChildStdout>,
    /// Whether the worker has been killed.
    killed: bool,
}

impl WorkerHandle {
    /// Spawn a worker process and verify it answers a ping.
    pub fn spawn(worker_path: &Path) -> Result<Self> {
        let mut child = Command::new(worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .spawn()
            .map_err(|e| {
                Error::Ipc(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdout".to_string()))?;

        let mut handle = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
        };

        handle.send_command(&WorkerCommand::Ping)?;
        match handle.recv_response()? {
            WorkerResponse::Pong => Ok(handle),
            other => Err(Error::Ipc(format!(
                "Unexpected response from worker: {:?}",
                other
            ))),
        }
    }

    /// Spawn a worker and initialize it with a runner blueprint.
    pub fn spawn_initialized(worker_path: &Path, init: &RemoteInit) -> Result<Self> {
        let mut handle = Self::spawn(worker_path)?;
        handle.send_command(&WorkerCommand::Init { init: init.clone() })?;
        match handle.recv_response()? {
            WorkerResponse::Ready => {
                tracing::debug!(
                    "Worker {} hosts runner {}",
                    handle.pid(),
                    init.runner_id
                );
                Ok(handle)
            }
            WorkerResponse::Error { message } => Err(Error::Component(format!(
                "worker could not rebuild runner {}: {}",
                init.runner_id, message
            ))),
            other => Err(Error::Ipc(format!(
                "Unexpected response when initializing worker: {:?}",
                other
            ))),
        }
    }

    /// Send a command to the worker.
    pub fn send_command(&mut self, cmd: &WorkerCommand) -> Result<()> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        write_message(&mut self.stdin, cmd)
    }

    /// Receive a response from the worker.
    pub fn recv_response(&mut self) -> Result<WorkerResponse> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        read_message(&mut self.stdout)
    }

    /// Run one task in the worker.
    ///
    /// Hook events the worker emits while running are fired on `events`.
    /// The outer `Result` fails when the worker itself is lost (crash, kill,
    /// broken pipe); the inner one carries the task's own outcome.
    pub fn call(&mut self, call: &LocalCall, events: &dyn RunnerHooks) -> Result<Result<MethodResult>> {
        self.send_command(&WorkerCommand::Call { call: call.clone() })?;

        loop {
            match self.recv_response()? {
                WorkerResponse::Event { event } => event.fire(events),
                WorkerResponse::Output { result } => return Ok(Ok(result)),
                WorkerResponse::Error { message } => return Ok(Err(Error::Remote(message))),
                WorkerResponse::Panic { message } => {
                    return Ok(Err(Error::Execution(format!(
                        "{} panicked in worker {}: {}",
                        call.method.name(),
                        self.pid(),
                        message
                    ))));
                }
                other => {
                    return Err(Error::Ipc(format!(
                        "Unexpected response when running task: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        self.killed = true;

        // Try graceful shutdown first
        let _ = write_message(&mut self.stdin, &WorkerCommand::Shutdown);

        // Give it a moment to shutdown gracefully
        std::thread::sleep(Duration::from_millis(10));

        // Force kill if still running
        if let Err(e) = self.child.kill() {
            // Process already exited, which is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();

        Ok(())
    }

    /// Reap a worker that stopped answering and report how it exited.
    pub fn reap(mut self) -> Option<ExitStatus> {
        self.killed = true;
        let _ = self.child.kill();
        self.child.wait().ok()
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        if self.killed {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Get the process ID of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Graceful shutdown - ask worker to exit cleanly.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        let _ = self.send_command(&WorkerCommand::Shutdown);
        self.killed = true;

        match self.child.wait() {
            Ok(status) => {
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::Ipc(format!("Worker exited with status: {}", status)))
                }
            }
            Err(e) => Err(Error::Ipc(format!("Failed to wait for worker: {}", e))),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Ensure worker is killed when handle is dropped
        let _ = self.kill();
    }
}

/// Whether a worker exited because of SIGINT.
pub fn died_from_interrupt(status: &ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal() == Some(libc::SIGINT)
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        false
    }
}

/// Find the framepipe-worker binary.
///
/// Looks in the following order:
/// 1. `explicit` (the configured worker path)
/// 2. `FRAMEPIPE_WORKER_PATH` environment variable
/// 3. Same directory as the current executable (and its parent, for test
///    binaries under `target/<profile>/deps`)
/// 4. System PATH
pub fn find_worker_binary(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(Error::Config(format!(
            "configured worker binary {} does not exist",
            path.display()
        )));
    }

    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points to missing file {}",
            WORKER_PATH_ENV,
            path.display()
        );
    }

    if let Ok(exe_path) = std::env::current_exe() {
        let mut dir = exe_path.parent();
        for _ in 0..2 {
            let Some(exe_dir) = dir else { break };
            let worker_path = exe_dir.join(WORKER_NAME);
            if worker_path.is_file() {
                return Ok(worker_path);
            }
            dir = exe_dir.parent();
        }
    }

    if let Ok(path) = which::which(WORKER_NAME) {
        return Ok(path);
    }

    Err(Error::Ipc(format!(
        "Could not find {} binary. Set {} or ensure it's in PATH.",
        WORKER_NAME, WORKER_PATH_ENV
    )))
}

/// Thread-safe handle for killing a worker from another thread.
#[derive(Clone)]
pub struct WorkerKillHandle {
    /// Process ID of the worker.
    pid: u32,
    /// Whether the kill has been requested.
    killed: Arc<AtomicBool>,
}

impl WorkerKillHandle {
    /// Create a kill handle for a worker.
    pub fn new(worker: &WorkerHandle) -> Self {
        Self {
            pid: worker.pid(),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Kill the worker process with SIGKILL.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return; // Already killed
        }

        tracing::debug!("Force-killing worker {}", self.pid);

        #[cfg(unix)]
        {
            // SAFETY: plain syscall on a pid we spawned; the slot thread has
            // not reaped it yet because it is still blocked on the pipe.
            unsafe {
                libc::kill(self.pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }

    /// Check if kill has been requested.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}
