//! Error types for framepipe-core.

use thiserror::Error;

/// Result type for framepipe-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in framepipe-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration or unsupported input (raised at the entry point).
    #[error("configuration error: {0}")]
    Config(String),

    /// A named component is not registered or its parameters are invalid.
    #[error("component error: {0}")]
    Component(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IPC communication error with a worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// A unit of work failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// An error raised inside a worker process, as rendered by the worker.
    #[error("{0}")]
    Remote(String),

    /// A worker process died while running a task.
    #[error("worker process crashed: {0}")]
    WorkerCrashed(String),

    /// A `LocalCall` could not be resolved to the runner that issued it.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// The task was cancelled before it produced a result.
    #[error("task cancelled")]
    Cancelled,

    /// The executor no longer accepts work.
    #[error("executor has been shut down")]
    ExecutorShutdown,

    /// Execution was interrupted (SIGINT or abort request).
    #[error("interrupted")]
    Interrupted,

    /// The render proxy replied with an error.
    #[error("render proxy error: {0}")]
    Proxy(String),

    /// A renderable reference was dereferenced outside its owning process.
    #[error("renderable reference owned by process {owner} used in process {current}")]
    ForeignReference { owner: u32, current: u32 },

    /// A renderable id is not present in the registry.
    #[error("unknown renderable id {0}")]
    UnknownRenderable(u64),
}

impl Error {
    /// Whether this error is the distinct interrupt condition.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Render the error with a recovery hint where one is known.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Config(_) => Some("check the source path and the executor settings"),
            Error::Component(_) => {
                Some("component names are resolved against the registry the worker was built with")
            }
            Error::Ipc(_) | Error::WorkerCrashed(_) => Some(
                "make sure framepipe-worker is built; set FRAMEPIPE_WORKER_PATH or executor.worker_path",
            ),
            Error::Dispatch(_) => Some("the executor initializer did not register this runner"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_is_distinct() {
        assert!(Error::Interrupted.is_interrupt());
        assert!(!Error::Execution("boom".to_string()).is_interrupt());
        assert!(!Error::Cancelled.is_interrupt());
    }

    #[test]
    fn test_hint_rendering() {
        let err = Error::Ipc("pipe closed".to_string());
        let text = err.with_hint();
        assert!(text.starts_with("IPC error: pipe closed"));
        assert!(text.contains("FRAMEPIPE_WORKER_PATH"));

        assert_eq!(Error::Cancelled.with_hint(), "task cancelled");
    }

    #[test]
    fn test_foreign_reference_message() {
        let err = Error::ForeignReference { owner: 10, current: 20 };
        assert_eq!(
            err.to_string(),
            "renderable reference owned by process 10 used in process 20"
        );
    }
}
