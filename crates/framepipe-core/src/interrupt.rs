//! SIGINT handling.
//!
//! While a run is active the process-wide SIGINT handler only records the
//! signal. Blocking waits poll [`is_pending`] through the runner's
//! `AbortHandle`, so an interrupt is honored even while the orchestrator is
//! blocked on a future. A background thread that learns about an interrupt
//! second-hand (a worker process killed by SIGINT) calls [`redeliver`] to
//! raise it in the owning process.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

static PENDING: AtomicBool = AtomicBool::new(false);

/// Whether SIGINT arrived while a guard is installed.
pub fn is_pending() -> bool {
    PENDING.load(Ordering::SeqCst)
}

pub fn clear() {
    PENDING.store(false, Ordering::SeqCst);
}

/// Restores the previous SIGINT disposition when dropped and forgets any
/// interrupt recorded under it.
pub struct InterruptGuard {
    #[cfg(unix)]
    previous: libc::sighandler_t,
}

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    PENDING.store(true, Ordering::SeqCst);
}

/// Install the recording SIGINT handler and clear any stale interrupt.
#[cfg(unix)]
pub fn install() -> Result<InterruptGuard> {
    clear();
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    let previous = unsafe { libc::signal(libc::SIGINT, handler) };
    if previous == libc::SIG_ERR {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(InterruptGuard { previous })
}

#[cfg(not(unix))]
pub fn install() -> Result<InterruptGuard> {
    clear();
    Ok(InterruptGuard {})
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: restores the disposition returned by `signal` in `install`.
        unsafe {
            libc::signal(libc::SIGINT, self.previous);
        }
        clear();
    }
}

/// Raise SIGINT in this process.
///
/// With the handler installed this sets the pending flag; without it the
/// default disposition terminates the process.
pub fn redeliver() {
    tracing::debug!("Re-delivering SIGINT to process {}", std::process::id());
    #[cfg(unix)]
    {
        // SAFETY: plain syscall targeting our own pid.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGINT);
        }
    }
    #[cfg(not(unix))]
    {
        PENDING.store(true, Ordering::SeqCst);
    }
}
