//! Hooks as data.
//!
//! A worker process cannot call the parent's hooks object. Its runner is
//! built with [`ForwardingHooks`], which turns every lifecycle call into a
//! [`HookEvent`] and hands it to a sink (the worker's IPC writer). The parent
//! replays each event with [`HookEvent::fire`].

use crate::error::Error;
use crate::media::{ItemSummary, ProcessResult, RunSpec};

use super::{FailureAction, RunnerHooks};

/// One lifecycle notification.
///
/// Failures carry the rendered error message; the parent sees them as
/// `Error::Remote`.
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum HookEvent {
    StartBatchJob { source: RunSpec },
    DeterminedBatchTaskCount { source: RunSpec, count: usize },
    SubmitBatchTask { spec: RunSpec },
    StartBatchTask { spec: RunSpec },
    EndBatchTask { spec: RunSpec },
    SuccessBatchTask { spec: RunSpec, summary: ItemSummary },
    FailureBatchTask { spec: RunSpec, message: String },
    EndBatchJob { source: RunSpec },
    StartFrameJob { spec: RunSpec },
    DeterminedFrameTaskCount { spec: RunSpec, count: usize },
    SubmitFrameTask { spec: RunSpec, index: usize },
    StartFrameTask { spec: RunSpec, index: usize },
    EndFrameTask { spec: RunSpec, index: usize },
    SuccessFrameTask { spec: RunSpec, index: usize, result: ProcessResult },
    FailureFrameTask { spec: RunSpec, index: usize, message: String },
    EndFrameJob { spec: RunSpec },
}

impl HookEvent {
    /// Replay this event on `hooks`.
    ///
    /// Forwarded events are notifications: the `FailureAction` returned by a
    /// failure hook is discarded because the worker already decided.
    pub fn fire(&self, hooks: &dyn RunnerHooks) {
        match self {
            HookEvent::StartBatchJob { source } => hooks.on_start_batch_job(source),
            HookEvent::DeterminedBatchTaskCount { source, count } => {
                hooks.on_determined_batch_task_count(source, *count)
            }
            HookEvent::SubmitBatchTask { spec } => hooks.on_submit_batch_task(spec),
            HookEvent::StartBatchTask { spec } => hooks.on_start_batch_task(spec),
            HookEvent::EndBatchTask { spec } => hooks.on_end_batch_task(spec),
            HookEvent::SuccessBatchTask { spec, summary } => {
                hooks.on_success_batch_task(spec, summary)
            }
            HookEvent::FailureBatchTask { spec, message } => {
                let error = Error::Remote(message.clone());
                let _ = hooks.on_failure_batch_task(spec, &error);
            }
            HookEvent::EndBatchJob { source } => hooks.on_end_batch_job(source),
            HookEvent::StartFrameJob { spec } => hooks.on_start_frame_job(spec),
            HookEvent::DeterminedFrameTaskCount { spec, count } => {
                hooks.on_determined_frame_task_count(spec, *count)
            }
            HookEvent::SubmitFrameTask { spec, index } => hooks.on_submit_frame_task(spec, *index),
            HookEvent::StartFrameTask { spec, index } => hooks.on_start_frame_task(spec, *index),
            HookEvent::EndFrameTask { spec, index } => hooks.on_end_frame_task(spec, *index),
            HookEvent::SuccessFrameTask {
                spec,
                index,
                result,
            } => hooks.on_success_frame_task(spec, *index, result),
            HookEvent::FailureFrameTask {
                spec,
                index,
                message,
            } => {
                let error = Error::Remote(message.clone());
                let _ = hooks.on_failure_frame_task(spec, *index, &error);
            }
            HookEvent::EndFrameJob { spec } => hooks.on_end_frame_job(spec),
        }
    }
}

type EventSink = Box<dyn Fn(HookEvent) + Send + Sync>;

/// Hooks that serialize every call into a `HookEvent`.
///
/// Failure hooks return `FailureAction::Raise` so the failure reaches the
/// parent through the task result. Terminal hooks keep their defaults.
pub struct ForwardingHooks {
    sink: EventSink,
}

impl ForwardingHooks {
    pub fn new(sink: impl Fn(HookEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    fn send(&self, event: HookEvent) {
        (self.sink)(event);
    }
}

impl RunnerHooks for ForwardingHooks {
    fn on_start_batch_job(&self, source: &RunSpec) {
        self.send(HookEvent::StartBatchJob {
            source: source.clone(),
        });
    }

    fn on_determined_batch_task_count(&self, source: &RunSpec, count: usize) {
        self.send(HookEvent::DeterminedBatchTaskCount {
            source: source.clone(),
            count,
        });
    }

    fn on_submit_batch_task(&self, spec: &RunSpec) {
        self.send(HookEvent::SubmitBatchTask { spec: spec.clone() });
    }

    fn on_start_batch_task(&self, spec: &RunSpec) {
        self.send(HookEvent::StartBatchTask { spec: spec.clone() });
    }

    fn on_end_batch_task(&self, spec: &RunSpec) {
        self.send(HookEvent::EndBatchTask { spec: spec.clone() });
    }

    fn on_success_batch_task(&self, spec: &RunSpec, summary: &ItemSummary) {
        self.send(HookEvent::SuccessBatchTask {
            spec: spec.clone(),
            summary: summary.clone(),
        });
    }

    fn on_failure_batch_task(&self, spec: &RunSpec, error: &Error) -> FailureAction {
        self.send(HookEvent::FailureBatchTask {
            spec: spec.clone(),
            message: error.to_string(),
        });
        FailureAction::Raise
    }

    fn on_end_batch_job(&self, source: &RunSpec) {
        self.send(HookEvent::EndBatchJob {
            source: source.clone(),
        });
    }

    fn on_start_frame_job(&self, spec: &RunSpec) {
        self.send(HookEvent::StartFrameJob { spec: spec.clone() });
    }

    fn on_determined_frame_task_count(&self, spec: &RunSpec, count: usize) {
        self.send(HookEvent::DeterminedFrameTaskCount {
            spec: spec.clone(),
            count,
        });
    }

    fn on_submit_frame_task(&self, spec: &RunSpec, index: usize) {
        self.send(HookEvent::SubmitFrameTask {
            spec: spec.clone(),
            index,
        });
    }

    fn on_start_frame_task(&self, spec: &RunSpec, index: usize) {
        self.send(HookEvent::StartFrameTask {
            spec: spec.clone(),
            index,
        });
    }

    fn on_end_frame_task(&self, spec: &RunSpec, index: usize) {
        self.send(HookEvent::EndFrameTask {
            spec: spec.clone(),
            index,
        });
    }

    fn on_success_frame_task(&self, spec: &RunSpec, index: usize, result: &ProcessResult) {
        self.send(HookEvent::SuccessFrameTask {
            spec: spec.clone(),
            index,
            result: result.clone(),
        });
    }

    fn on_failure_frame_task(&self, spec: &RunSpec, index: usize, error: &Error) -> FailureAction {
        self.send(HookEvent::FailureFrameTask {
            spec: spec.clone(),
            index,
            message: error.to_string(),
        });
        FailureAction::Raise
    }

    fn on_end_frame_job(&self, spec: &RunSpec) {
        self.send(HookEvent::EndFrameJob { spec: spec.clone() });
    }
}
