//! Execution backends.
//!
//! An [`Executor`] runs [`LocalCall`]s and hands back [`TaskFuture`]s:
//!
//! - `Dummy` - synchronous, on the submitting thread
//! - `Threads` - bounded rayon pool
//! - `Processes` - pool of `framepipe-worker` processes with forced-cancel shutdown
//!
//! [`configure`] picks the backend for one execution mode.

mod context;
mod dispatch;
mod dummy;
mod future;
mod process;
mod threads;

pub use context::AbortHandle;
pub(crate) use dispatch::panic_message;
pub use dispatch::{
    DispatchTarget, LocalCall, MethodCall, MethodResult, RemoteInit, RunnerId, dispatch,
    dispatch_catching, is_registered, register, unregister,
};
pub use dummy::DummyExecutor;
pub use future::{Completer, TaskFuture};
pub use process::ProcessExecutor;
pub use threads::ThreadExecutor;

use std::sync::Arc;

use crate::config::{ExecutionMode, ExecutorConfig, ExecutorKind};
use crate::error::Result;

/// An execution backend for one mode of one runner.
pub enum Executor {
    Dummy(DummyExecutor),
    Threads(ThreadExecutor),
    Processes(ProcessExecutor),
}

/// Build the executor `mode` should use under `config`.
///
/// Falls back to `Dummy` when `mode` is not the configured parallel mode,
/// when the kind is `none`, or when `max_parallel` is 0.
pub fn configure(
    config: &ExecutorConfig,
    mode: ExecutionMode,
    target: &Arc<dyn DispatchTarget>,
) -> Result<Executor> {
    if !config.parallel_for(mode) {
        tracing::debug!("Using synchronous executor for {} mode", mode);
        return Ok(Executor::Dummy(DummyExecutor::new(target)));
    }

    match config.kind {
        ExecutorKind::Thread => {
            ThreadExecutor::new(config.thread_pool_size(), target).map(Executor::Threads)
        }
        ExecutorKind::Process => ProcessExecutor::new(config, target).map(Executor::Processes),
        ExecutorKind::None => Ok(Executor::Dummy(DummyExecutor::new(target))),
    }
}

impl Executor {
    /// Hand a call to the backend.
    ///
    /// Never fails directly; submission errors (such as a closed executor)
    /// come back through the future.
    pub fn submit(&self, call: LocalCall) -> TaskFuture<MethodResult> {
        match self {
            Executor::Dummy(executor) => executor.submit(call),
            Executor::Threads(executor) => executor.submit(call),
            Executor::Processes(executor) => executor.submit(call),
        }
    }

    /// Stop accepting work; see the backend for the exact semantics.
    pub fn shutdown(&self, wait: bool, cancel_futures: bool) {
        match self {
            Executor::Dummy(executor) => executor.shutdown(),
            Executor::Threads(executor) => executor.shutdown(wait, cancel_futures),
            Executor::Processes(executor) => executor.shutdown(wait, cancel_futures),
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, Executor::Dummy(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Executor::Dummy(_) => "dummy",
            Executor::Threads(_) => "threads",
            Executor::Processes(_) => "processes",
        }
    }

    /// Number of units that can run at once.
    pub fn max_workers(&self) -> usize {
        match self {
            Executor::Dummy(_) => 1,
            Executor::Threads(executor) => executor.size(),
            Executor::Processes(executor) => executor.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::Error;
    use crate::events::{NoopHooks, RunnerHooks};
    use crate::media::{Frame, ProcessResult, RunSpec};

    struct SlowEcho {
        id: RunnerId,
        calls: AtomicUsize,
    }

    impl DispatchTarget for SlowEcho {
        fn runner_id(&self) -> RunnerId {
            self.id
        }

        fn kind(&self) -> &str {
            "slow-echo"
        }

        fn invoke(&self, method: MethodCall) -> Result<MethodResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                MethodCall::ProcessFrame { index, .. } => {
                    std::thread::sleep(Duration::from_millis(30));
                    if index == 99 {
                        return Err(Error::Execution("frame 99 is cursed".to_string()));
                    }
                    Ok(MethodResult::Frame(ProcessResult {
                        frame_id: index,
                        headers: Vec::new(),
                        landmarks: vec![index as f32],
                        annotated_frame: None,
                    }))
                }
                MethodCall::RunSingle { .. } => Err(Error::Execution("unsupported".to_string())),
            }
        }

        fn remote_init(&self) -> Option<RemoteInit> {
            None
        }

        fn event_sink(&self) -> Arc<dyn RunnerHooks> {
            Arc::new(NoopHooks)
        }
    }

    fn target(id: RunnerId) -> Arc<dyn DispatchTarget> {
        Arc::new(SlowEcho {
            id,
            calls: AtomicUsize::new(0),
        })
    }

    fn frame_call(id: RunnerId, index: usize) -> LocalCall {
        LocalCall {
            runner_id: id,
            kind: "slow-echo".to_string(),
            method: MethodCall::ProcessFrame {
                spec: RunSpec::new("/v.raw", "/out").unwrap(),
                index,
                frame: Frame::encoded(vec![0]),
            },
        }
    }

    #[test]
    fn test_configure_falls_back_to_dummy() {
        let target = target(31);

        let zero = ExecutorConfig::new(ExecutionMode::Frames, ExecutorKind::Thread, 0);
        assert!(configure(&zero, ExecutionMode::Frames, &target).unwrap().is_dummy());

        let mismatched = ExecutorConfig::new(ExecutionMode::Batch, ExecutorKind::Thread, 4);
        assert!(configure(&mismatched, ExecutionMode::Frames, &target).unwrap().is_dummy());

        let matched = configure(&mismatched, ExecutionMode::Batch, &target).unwrap();
        assert_eq!(matched.name(), "threads");
        assert_eq!(matched.max_workers(), 4);
    }

    #[test]
    fn test_dummy_submit_returns_after_completion() {
        let target = target(32);
        let executor = configure(&ExecutorConfig::synchronous(), ExecutionMode::Frames, &target).unwrap();
        let future = executor.submit(frame_call(32, 3));
        assert!(future.is_done());
        match future.wait().unwrap() {
            MethodResult::Frame(result) => assert_eq!(result.frame_id, 3),
            other => panic!("unexpected {:?}", other),
        }

        let failed = executor.submit(frame_call(32, 99));
        assert!(failed.is_done());
        assert!(matches!(failed.wait(), Err(Error::Execution(_))));
    }

    #[test]
    fn test_process_pool_without_blueprint_is_config_error() {
        let target = target(33);
        let config = ExecutorConfig::new(ExecutionMode::Frames, ExecutorKind::Process, 2);
        assert!(matches!(
            configure(&config, ExecutionMode::Frames, &target),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_thread_pool_runs_and_shuts_down() {
        let target = target(34);
        let config = ExecutorConfig::new(ExecutionMode::Frames, ExecutorKind::Thread, 3);
        let executor = configure(&config, ExecutionMode::Frames, &target).unwrap();

        let futures: Vec<_> = (0..6).map(|i| executor.submit(frame_call(34, i))).collect();
        for (index, future) in futures.into_iter().enumerate() {
            match future.wait().unwrap() {
                MethodResult::Frame(result) => assert_eq!(result.frame_id, index),
                other => panic!("unexpected {:?}", other),
            }
        }

        executor.shutdown(true, false);
        assert!(matches!(
            executor.submit(frame_call(34, 0)).wait(),
            Err(Error::ExecutorShutdown)
        ));
    }

    #[test]
    fn test_thread_pool_cancel_futures() {
        let target = target(35);
        let config = ExecutorConfig::new(ExecutionMode::Frames, ExecutorKind::Thread, 1);
        let executor = configure(&config, ExecutionMode::Frames, &target).unwrap();

        let futures: Vec<_> = (0..8).map(|i| executor.submit(frame_call(35, i))).collect();
        executor.shutdown(true, true);

        let cancelled = futures
            .into_iter()
            .map(|f| f.wait())
            .filter(|outcome| matches!(outcome, Err(Error::Cancelled)))
            .count();
        assert!(cancelled >= 1, "queued tasks should be cancelled");
    }
}
