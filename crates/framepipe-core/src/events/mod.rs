//! Lifecycle hooks for batch and frame scheduling.
//!
//! Two nested units are observed: a *batch task* processes one item and a
//! *frame task* analyzes one frame. Each level is wrapped in a *job*.
//!
//! - `on_submit_*` fires right before a unit is handed to an executor
//! - `on_start_*` / `on_end_*` fire inside the unit around its body
//! - exactly one of `on_success_*` / `on_failure_*` fires from the unit's
//!   done-callback
//!
//! Hooks fired inside a worker process are shipped to the parent as
//! [`HookEvent`]s and replayed on the parent's hooks object.

mod forward;
mod guard;

pub use forward::{ForwardingHooks, HookEvent};
pub use guard::{JobGuard, TaskGuard};

use crate::error::{Error, Result};
use crate::media::{ItemSummary, ProcessResult, RunSpec};

/// What the scheduler should do with a failed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    /// Propagate the failure to the caller of the job.
    #[default]
    Raise,
    /// Drop the failed unit and keep going.
    Ignore,
}

/// Observer of the runner lifecycle.
///
/// Every method has a no-op default. Hooks may be called from executor
/// threads, so implementations must be thread-safe.
pub trait RunnerHooks: Send + Sync {
    /// Called before the source tree of a batch run is scanned.
    fn on_start_batch_job(&self, _source: &RunSpec) {}

    /// Called once the scan has produced every batch task.
    fn on_determined_batch_task_count(&self, _source: &RunSpec, _count: usize) {}

    fn on_submit_batch_task(&self, _spec: &RunSpec) {}

    fn on_start_batch_task(&self, _spec: &RunSpec) {}

    fn on_end_batch_task(&self, _spec: &RunSpec) {}

    fn on_success_batch_task(&self, _spec: &RunSpec, _summary: &ItemSummary) {}

    /// Called when a batch task fails, crashes or is cancelled.
    fn on_failure_batch_task(&self, _spec: &RunSpec, _error: &Error) -> FailureAction {
        FailureAction::Raise
    }

    fn on_end_batch_job(&self, _source: &RunSpec) {}

    fn on_start_frame_job(&self, _spec: &RunSpec) {}

    /// Called after every frame of an item was submitted.
    fn on_determined_frame_task_count(&self, _spec: &RunSpec, _count: usize) {}

    fn on_submit_frame_task(&self, _spec: &RunSpec, _index: usize) {}

    fn on_start_frame_task(&self, _spec: &RunSpec, _index: usize) {}

    fn on_end_frame_task(&self, _spec: &RunSpec, _index: usize) {}

    fn on_success_frame_task(&self, _spec: &RunSpec, _index: usize, _result: &ProcessResult) {}

    /// Called when a frame task fails, crashes or is cancelled.
    fn on_failure_frame_task(&self, _spec: &RunSpec, _index: usize, _error: &Error) -> FailureAction {
        FailureAction::Raise
    }

    fn on_end_frame_job(&self, _spec: &RunSpec) {}

    /// Called when the run was interrupted. Re-raises by default; returning
    /// `Ok` turns the run into an `Interrupted` report.
    fn on_keyboard_interrupt(&self) -> Result<()> {
        Err(Error::Interrupted)
    }

    /// Called when the run failed. Re-raises by default.
    fn on_general_exception(&self, error: Error) -> Result<()> {
        Err(error)
    }

    /// Called after a run finished without error.
    fn on_complete(&self) {}

    /// Called last, whatever the outcome.
    fn on_finally(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl RunnerHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reraise_terminal_conditions() {
        let hooks = NoopHooks;
        assert!(matches!(hooks.on_keyboard_interrupt(), Err(Error::Interrupted)));
        assert!(matches!(
            hooks.on_general_exception(Error::Execution("x".to_string())),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn test_default_failure_action_is_raise() {
        let hooks = NoopHooks;
        let spec = RunSpec::new("/a.mp4", "/out/a").unwrap();
        let err = Error::Cancelled;
        assert_eq!(hooks.on_failure_batch_task(&spec, &err), FailureAction::Raise);
        assert_eq!(hooks.on_failure_frame_task(&spec, 2, &err), FailureAction::Raise);
        assert_eq!(FailureAction::default(), FailureAction::Raise);
    }
}
