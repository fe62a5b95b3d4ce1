//! Cancellation primitives shared by executors and the runner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle for cooperative cancellation of a run.
///
/// `AbortHandle` provides a thread-safe mechanism for signaling that execution
/// should stop. It can be cloned and shared across threads, and any clone can
/// trigger the abort which will be visible to all other clones.
///
/// # Example
///
/// ```
/// use framepipe_core::execute::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let handle_clone = handle.clone();
///
/// assert!(!handle.is_aborted());
/// handle_clone.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Clone, Default)]
pub struct AbortHandle {
    /// Shared abort flag.
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if abort has been requested (locally or by SIGINT).
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed) || crate::interrupt::is_pending()
    }

    /// Request abort of execution.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Reset the abort flag.
    ///
    /// Called before starting a new run to clear any previous abort.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_handle_clone_shares_state() {
        let handle = AbortHandle::new();
        let clone = handle.clone();

        assert!(!handle.is_aborted());
        assert!(!clone.is_aborted());

        clone.abort();

        assert!(handle.is_aborted());
        assert!(clone.is_aborted());
    }

    #[test]
    fn test_abort_handle_reset() {
        let handle = AbortHandle::new();
        handle.abort();
        assert!(handle.is_aborted());

        handle.reset();
        assert!(!handle.is_aborted());
    }

    #[test]
    fn test_abort_handle_default() {
        let handle = AbortHandle::default();
        assert!(!handle.is_aborted());
    }
}
