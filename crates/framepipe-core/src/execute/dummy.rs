use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Error;

use super::dispatch::{self, DispatchTarget, LocalCall, MethodResult, RunnerId};
use super::future::TaskFuture;

/// Runs every call synchronously on the submitting thread.
///
/// `submit` returns an already-completed future, so ordering is identical to
/// serial execution. Errors and panics surface through the future.
pub struct DummyExecutor {
    runner_id: RunnerId,
    target: Weak<dyn DispatchTarget>,
    closed: AtomicBool,
}

impl DummyExecutor {
    pub fn new(target: &Arc<dyn DispatchTarget>) -> Self {
        Self {
            runner_id: target.runner_id(),
            target: Arc::downgrade(target),
            closed: AtomicBool::new(false),
        }
    }

    pub fn submit(&self, call: LocalCall) -> TaskFuture<MethodResult> {
        if self.closed.load(Ordering::SeqCst) {
            return TaskFuture::ready(Err(Error::ExecutorShutdown));
        }
        // The submitting thread may never have run an initializer.
        if !dispatch::is_registered(self.runner_id) {
            if let Some(target) = self.target.upgrade() {
                dispatch::register(&target);
            }
        }
        TaskFuture::ready(dispatch::dispatch_catching(call))
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
