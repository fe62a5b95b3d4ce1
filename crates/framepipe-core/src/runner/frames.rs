//! Frame-level scheduling.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use crate::config::ExecutionMode;
use crate::error::{Error, Result};
use crate::events::{FailureAction, JobGuard, RunnerHooks, TaskGuard};
use crate::execute::{AbortHandle, MethodCall, MethodResult, TaskFuture};
use crate::media::{Frame, FrameSequence, ProcessResult, RunSpec};

use super::Runner;

struct PendingFrame {
    index: usize,
    future: TaskFuture<MethodResult>,
    action: Arc<OnceLock<FailureAction>>,
}

/// Frame results of one item, yielded in ascending frame order.
///
/// Frames whose failure hook returned `Ignore` are skipped. The first raised
/// failure ends the sequence. Dropping the iterator ends the frame job.
pub struct OrderedResults {
    pending: VecDeque<PendingFrame>,
    abort: AbortHandle,
    _job: JobGuard,
}

impl OrderedResults {
    /// Frames not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for OrderedResults {
    type Item = Result<ProcessResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.pending.pop_front()?;
            match frame.future.wait_abortable(&self.abort) {
                Ok(MethodResult::Frame(result)) => return Some(Ok(result)),
                Ok(other) => {
                    self.pending.clear();
                    return Some(Err(Error::Execution(format!(
                        "frame {} returned {:?}",
                        frame.index, other
                    ))));
                }
                Err(e) if e.is_interrupt() => {
                    self.pending.clear();
                    return Some(Err(e));
                }
                Err(e) => {
                    if frame.action.get() == Some(&FailureAction::Ignore) {
                        tracing::debug!("Ignoring failed frame {}: {}", frame.index, e);
                        continue;
                    }
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Runner {
    /// Submit one task per frame and return their results in frame order.
    ///
    /// Every frame is submitted before this returns. The frame count hook
    /// fires after the last submission.
    pub fn process_frames(&self, spec: &RunSpec, frames: FrameSequence) -> Result<OrderedResults> {
        let job = JobGuard::frame(self.hooks.clone(), spec);
        self.estimator.setup()?;
        let executor = self.executor(ExecutionMode::Frames)?;

        let mut pending = VecDeque::new();
        for (index, frame) in frames.enumerate() {
            if self.abort.is_aborted() {
                return Err(Error::Interrupted);
            }
            let frame = frame?;

            self.hooks.on_submit_frame_task(spec, index);
            let future = executor.submit(self.call(MethodCall::ProcessFrame {
                spec: spec.clone(),
                index,
                frame,
            }));

            let action = Arc::new(OnceLock::new());
            let hooks = self.hooks.clone();
            let slot = action.clone();
            let item = spec.clone();
            future.add_done_callback(move |outcome| match outcome {
                Ok(MethodResult::Frame(result)) => hooks.on_success_frame_task(&item, index, result),
                Ok(other) => {
                    let error = Error::Execution(format!("frame {} returned {:?}", index, other));
                    let _ = slot.set(hooks.on_failure_frame_task(&item, index, &error));
                }
                Err(e) => {
                    let _ = slot.set(hooks.on_failure_frame_task(&item, index, e));
                }
            });

            pending.push_back(PendingFrame {
                index,
                future,
                action,
            });
        }

        tracing::debug!("Submitted {} frames of {}", pending.len(), spec);
        self.hooks.on_determined_frame_task_count(spec, pending.len());

        Ok(OrderedResults {
            pending,
            abort: self.abort.clone(),
            _job: job,
        })
    }

    /// Body of one frame task.
    pub(crate) fn process_frame(&self, spec: &RunSpec, index: usize, frame: &Frame) -> Result<ProcessResult> {
        let _task = TaskGuard::frame(self.hooks.as_ref(), spec, index);
        self.estimator.setup()?;
        let landmarks = self.estimator.estimate(frame, index)?;
        let annotated = self.estimator.annotate(frame, index, &landmarks)?;
        Ok(ProcessResult {
            frame_id: index,
            headers: self.estimator.headers(),
            landmarks,
            annotated_frame: Some(annotated),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::builtin::{NullCollector, SyntheticEstimator};
    use crate::config::{ExecutorConfig, ExecutorKind};
    use crate::stages::MediaOpener;

    struct NoOpener;

    impl MediaOpener for NoOpener {
        fn open(&self, spec: &RunSpec, _kind: crate::media::MediaKind) -> Result<FrameSequence> {
            Err(Error::Config(format!("{} cannot be opened", spec)))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        ignore_failures: bool,
    }

    impl RunnerHooks for Recorder {
        fn on_start_frame_job(&self, _spec: &RunSpec) {
            self.events.lock().unwrap().push("start_job".to_string());
        }

        fn on_determined_frame_task_count(&self, _spec: &RunSpec, count: usize) {
            self.events.lock().unwrap().push(format!("count {}", count));
        }

        fn on_failure_frame_task(&self, _spec: &RunSpec, index: usize, _error: &Error) -> FailureAction {
            self.events.lock().unwrap().push(format!("failure {}", index));
            if self.ignore_failures {
                FailureAction::Ignore
            } else {
                FailureAction::Raise
            }
        }

        fn on_end_frame_job(&self, _spec: &RunSpec) {
            self.events.lock().unwrap().push("end_job".to_string());
        }
    }

    fn frames(count: usize) -> FrameSequence {
        Box::new((0..count).map(|i| Frame::raw(2, 1, 1, vec![i as u8, 1])))
    }

    fn runner(estimator: SyntheticEstimator, kind: ExecutorKind, hooks: Arc<Recorder>) -> Arc<Runner> {
        Runner::builder()
            .estimator(Arc::new(estimator))
            .collector(Arc::new(NullCollector))
            .opener(Arc::new(NoOpener))
            .hooks(hooks)
            .config(ExecutorConfig::new(ExecutionMode::Frames, kind, 3))
            .build()
            .unwrap()
    }

    #[test]
    fn test_results_in_frame_order_on_thread_pool() {
        let hooks = Arc::new(Recorder::default());
        let runner = runner(SyntheticEstimator::new(2), ExecutorKind::Thread, hooks.clone());
        let spec = RunSpec::new("/clip.raw", "/out/clip").unwrap();

        let results: Vec<_> = runner
            .process_frames(&spec, frames(10))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.frame_id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert!(results.iter().all(|r| r.headers == vec!["lm0", "lm1"]));

        let events = hooks.events.lock().unwrap();
        assert_eq!(*events, vec!["start_job", "count 10", "end_job"]);
    }

    #[test]
    fn test_ignored_failures_are_skipped() {
        let hooks = Arc::new(Recorder {
            ignore_failures: true,
            ..Recorder::default()
        });
        let estimator = SyntheticEstimator::new(2).failing_on([1, 3]);
        let runner = runner(estimator, ExecutorKind::None, hooks.clone());
        let spec = RunSpec::new("/clip.raw", "/out/clip").unwrap();

        let ids: Vec<_> = runner
            .process_frames(&spec, frames(5))
            .unwrap()
            .map(|r| r.unwrap().frame_id)
            .collect();
        assert_eq!(ids, vec![0, 2, 4]);
    }

    #[test]
    fn test_raised_failure_ends_sequence() {
        let hooks = Arc::new(Recorder::default());
        let estimator = SyntheticEstimator::new(2).failing_on([2]);
        let runner = runner(estimator, ExecutorKind::Thread, hooks.clone());
        let spec = RunSpec::new("/clip.raw", "/out/clip").unwrap();

        let mut results = runner.process_frames(&spec, frames(5)).unwrap();
        assert!(results.next().unwrap().is_ok());
        assert!(results.next().unwrap().is_ok());
        assert!(matches!(results.next(), Some(Err(Error::Execution(_)))));
        assert!(results.next().is_none());
        drop(results);

        let events = hooks.events.lock().unwrap();
        assert!(events.contains(&"failure 2".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("end_job"));
    }

    #[test]
    fn test_decode_error_ends_job() {
        let hooks = Arc::new(Recorder::default());
        let runner = runner(SyntheticEstimator::new(2), ExecutorKind::None, hooks.clone());
        let spec = RunSpec::new("/clip.raw", "/out/clip").unwrap();
        let broken: FrameSequence = Box::new(
            vec![
                Frame::raw(2, 1, 1, vec![0, 0]),
                Err(Error::Execution("truncated".to_string())),
            ]
            .into_iter(),
        );

        assert!(runner.process_frames(&spec, broken).is_err());
        let events = hooks.events.lock().unwrap();
        assert_eq!(*events, vec!["start_job", "end_job"]);
    }
}
