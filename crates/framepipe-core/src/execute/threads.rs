use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::error::{Error, Result};

use super::dispatch::{self, DispatchTarget, LocalCall, MethodResult};
use super::future::TaskFuture;

/// Count of submitted tasks that have not finished yet.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self.idle.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Decrements the in-flight count even if a done-callback panics.
struct Leave(Arc<InFlight>);

impl Drop for Leave {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// Bounded pool of worker threads.
///
/// Every pool thread registers the target for local dispatch when it starts.
pub struct ThreadExecutor {
    pool: rayon::ThreadPool,
    size: usize,
    closed: AtomicBool,
    cancelled: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

impl ThreadExecutor {
    pub fn new(size: usize, target: &Arc<dyn DispatchTarget>) -> Result<Self> {
        let runner = Arc::downgrade(target);
        let runner_id = target.runner_id();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(move |index| format!("framepipe-{}-{}", runner_id, index))
            .start_handler(move |_| {
                if let Some(target) = runner.upgrade() {
                    dispatch::register(&target);
                }
            })
            .panic_handler(|payload| {
                tracing::error!(
                    "task callback panicked on pool thread: {}",
                    dispatch::panic_message(payload.as_ref())
                );
            })
            .build()
            .map_err(|e| Error::Execution(format!("Failed to build thread pool: {}", e)))?;

        tracing::debug!("Started thread pool with {} threads for runner {}", size, runner_id);

        Ok(Self {
            pool,
            size,
            closed: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit(&self, call: LocalCall) -> TaskFuture<MethodResult> {
        if self.closed.load(Ordering::SeqCst) {
            return TaskFuture::ready(Err(Error::ExecutorShutdown));
        }

        let (future, completer) = TaskFuture::pending();
        let cancelled = self.cancelled.clone();
        self.in_flight.enter();
        let leave = Leave(self.in_flight.clone());

        self.pool.spawn(move || {
            let _leave = leave;
            if cancelled.load(Ordering::SeqCst) {
                // Dropping the completer resolves the future as cancelled.
                drop(completer);
                return;
            }
            completer.complete(dispatch::dispatch_catching(call));
        });

        future
    }

    /// Stop accepting work. With `cancel_futures`, queued tasks resolve as
    /// cancelled instead of running. With `wait`, block until running tasks
    /// have finished.
    pub fn shutdown(&self, wait: bool, cancel_futures: bool) {
        self.closed.store(true, Ordering::SeqCst);
        if cancel_futures {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        if wait {
            self.in_flight.wait_idle();
        }
    }
}
