//! Futures returned by executors.
//!
//! A `TaskFuture` is the receiving half of a one-shot slot; the executor keeps
//! the `Completer`. Done-callbacks run on the completing thread, before the
//! outcome becomes visible to `wait`, so every hook fired by a callback is
//! ordered before the orchestrator observes the result.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};

use super::context::AbortHandle;

type DoneCallback<T> = Box<dyn FnOnce(&Result<T>) + Send>;

struct Slot<T> {
    outcome: Option<Result<T>>,
    callbacks: Vec<DoneCallback<T>>,
    completed: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // A panicking callback must not wedge the future.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the eventual outcome of a submitted unit.
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

/// Producer half of a `TaskFuture`.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

/// How long a blocked `wait_abortable` sleeps between abort checks.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl<T> TaskFuture<T> {
    /// Create a pending future and its completer.
    pub fn pending() -> (Self, Completer<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                outcome: None,
                callbacks: Vec::new(),
                completed: false,
            }),
            ready: Condvar::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            Completer { shared },
        )
    }

    /// Create an already-completed future.
    pub fn ready(outcome: Result<T>) -> Self {
        let (future, completer) = Self::pending();
        completer.complete(outcome);
        future
    }

    /// Whether the unit has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        self.shared.lock().completed
    }

    /// Attach a callback fired exactly once with the outcome.
    ///
    /// If the future is already complete the callback runs immediately on the
    /// calling thread. Callbacks must be attached before `wait`.
    pub fn add_done_callback(&self, callback: impl FnOnce(&Result<T>) + Send + 'static) {
        let mut slot = self.shared.lock();
        if slot.completed {
            if let Some(outcome) = slot.outcome.as_ref() {
                callback(outcome);
            }
            return;
        }
        slot.callbacks.push(Box::new(callback));
    }

    /// Block until the outcome is available and take it.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.lock();
        while !slot.completed {
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.outcome
            .take()
            .unwrap_or_else(|| Err(Error::Execution("task outcome already taken".to_string())))
    }

    /// Like `wait`, but gives up with `Error::Interrupted` once `abort` fires.
    pub fn wait_abortable(self, abort: &AbortHandle) -> Result<T> {
        let mut slot = self.shared.lock();
        while !slot.completed {
            if abort.is_aborted() {
                return Err(Error::Interrupted);
            }
            let (guard, _timeout) = self
                .shared
                .ready
                .wait_timeout(slot, ABORT_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        slot.outcome
            .take()
            .unwrap_or_else(|| Err(Error::Execution("task outcome already taken".to_string())))
    }
}

impl<T> Completer<T> {
    /// Publish the outcome. Done-callbacks run first, then waiters wake.
    ///
    /// Completing twice is a no-op.
    pub fn complete(self, outcome: Result<T>) {
        let mut slot = self.shared.lock();
        if slot.completed {
            return;
        }
        let callbacks = std::mem::take(&mut slot.callbacks);
        for callback in callbacks {
            callback(&outcome);
        }
        slot.outcome = Some(outcome);
        slot.completed = true;
        drop(slot);
        self.shared.ready.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        // A completer dropped without completing (task discarded by a
        // shutting-down pool) resolves the future as cancelled.
        let mut slot = self.shared.lock();
        if slot.completed {
            return;
        }
        let outcome: Result<T> = Err(Error::Cancelled);
        let callbacks = std::mem::take(&mut slot.callbacks);
        for callback in callbacks {
            callback(&outcome);
        }
        slot.outcome = Some(outcome);
        slot.completed = true;
        drop(slot);
        self.shared.ready.notify_all();
    }
}
