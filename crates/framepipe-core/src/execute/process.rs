//! Resilient pool of `framepipe-worker` processes.
//!
//! Each slot is a parent-side thread that owns at most one worker process and
//! pulls jobs from a shared queue. A worker that dies fails only the task it
//! was running; the slot spawns a fresh worker for its next job.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::events::RunnerHooks;
use crate::interrupt;
use crate::ipc::{WorkerHandle, WorkerKillHandle, died_from_interrupt, find_worker_binary};

use super::dispatch::{DispatchTarget, LocalCall, MethodResult, RemoteInit};
use super::future::{Completer, TaskFuture};

struct Job {
    call: LocalCall,
    completer: Completer<MethodResult>,
}

/// Kill handles of the workers currently owned by each slot.
type KillBoard = Arc<Mutex<Vec<Option<WorkerKillHandle>>>>;

pub struct ProcessExecutor {
    jobs: Mutex<Option<Sender<Job>>>,
    backlog: Receiver<Job>,
    slots: Mutex<Vec<JoinHandle<()>>>,
    kill_board: KillBoard,
    cancelled: Arc<AtomicBool>,
    size: usize,
}

impl ProcessExecutor {
    /// Start `config.process_pool_size()` slots. Workers are spawned lazily
    /// by each slot on its first job.
    pub fn new(config: &ExecutorConfig, target: &Arc<dyn DispatchTarget>) -> Result<Self> {
        let init = target.remote_init().ok_or_else(|| {
            Error::Config(format!(
                "runner {} has no blueprint and cannot run in a process pool",
                target.runner_id()
            ))
        })?;
        let worker_path = find_worker_binary(config.worker_path.as_deref())?;
        let size = config.process_pool_size();
        let events = target.event_sink();

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let kill_board: KillBoard = Arc::new(Mutex::new(vec![None; size]));
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            let slot = Slot {
                index,
                worker_path: worker_path.clone(),
                init: init.clone(),
                jobs: receiver.clone(),
                events: events.clone(),
                kill_board: kill_board.clone(),
                cancelled: cancelled.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("framepipe-slot-{}", index))
                .spawn(move || slot.run())?;
            slots.push(handle);
        }

        tracing::debug!(
            "Started process pool with {} slots using {}",
            size,
            worker_path.display()
        );

        Ok(Self {
            jobs: Mutex::new(Some(sender)),
            backlog: receiver,
            slots: Mutex::new(slots),
            kill_board,
            cancelled,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit(&self, call: LocalCall) -> TaskFuture<MethodResult> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = jobs.as_ref() else {
            return TaskFuture::ready(Err(Error::ExecutorShutdown));
        };

        let (future, completer) = TaskFuture::pending();
        // A failed send hands the job back; dropping it cancels the future.
        let _ = sender.send(Job { call, completer });
        future
    }

    /// Stop accepting work.
    ///
    /// With `cancel_futures`, queued jobs resolve as cancelled and every live
    /// worker is killed with SIGKILL, failing its in-flight task. Without it,
    /// slots drain the queue and then stop their workers gracefully. With
    /// `wait`, block until every slot thread has exited.
    pub fn shutdown(&self, wait: bool, cancel_futures: bool) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if cancel_futures {
            self.cancelled.store(true, Ordering::SeqCst);
            let mut discarded = 0usize;
            while let Ok(job) = self.backlog.try_recv() {
                drop(job);
                discarded += 1;
            }
            let board = self.kill_board.lock().unwrap_or_else(PoisonError::into_inner);
            let mut killed = 0usize;
            for handle in board.iter().flatten() {
                handle.kill();
                killed += 1;
            }
            if discarded > 0 || killed > 0 {
                tracing::info!(
                    "Process pool cancelled {} queued tasks and killed {} workers",
                    discarded,
                    killed
                );
            }
        }

        if wait {
            let slots = std::mem::take(&mut *self.slots.lock().unwrap_or_else(PoisonError::into_inner));
            for slot in slots {
                if slot.join().is_err() {
                    tracing::warn!("process pool slot thread panicked");
                }
            }
        }
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        self.shutdown(false, true);
    }
}

struct Slot {
    index: usize,
    worker_path: PathBuf,
    init: RemoteInit,
    jobs: Receiver<Job>,
    events: Arc<dyn RunnerHooks>,
    kill_board: KillBoard,
    cancelled: Arc<AtomicBool>,
}

impl Slot {
    fn run(self) {
        let mut worker: Option<WorkerHandle> = None;

        while let Ok(job) = self.jobs.recv() {
            if self.cancelled.load(Ordering::SeqCst) {
                drop(job);
                continue;
            }

            let mut handle = match worker.take() {
                Some(handle) => handle,
                None => match self.spawn_worker() {
                    Ok(handle) => handle,
                    Err(e) => {
                        job.completer.complete(Err(e));
                        continue;
                    }
                },
            };

            match handle.call(&job.call, self.events.as_ref()) {
                Ok(outcome) => {
                    job.completer.complete(outcome);
                    worker = Some(handle);
                }
                Err(lost) => {
                    self.publish_kill_handle(None);
                    let pid = handle.pid();
                    let status = handle.reap();
                    let error = if self.cancelled.load(Ordering::SeqCst) {
                        Error::Cancelled
                    } else if status.as_ref().is_some_and(died_from_interrupt) {
                        tracing::warn!("Worker {} was interrupted", pid);
                        interrupt::redeliver();
                        Error::Interrupted
                    } else {
                        let exit = status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown exit status".to_string());
                        tracing::warn!("Worker {} crashed ({}): {}", pid, exit, lost);
                        Error::WorkerCrashed(format!(
                            "worker {} running {} exited with {}",
                            pid,
                            job.call.method.name(),
                            exit
                        ))
                    };
                    job.completer.complete(Err(error));
                }
            }
        }

        self.publish_kill_handle(None);
        if let Some(handle) = worker {
            if let Err(e) = handle.shutdown() {
                tracing::debug!("slot {}: worker shutdown: {}", self.index, e);
            }
        }
    }

    fn spawn_worker(&self) -> Result<WorkerHandle> {
        let handle = WorkerHandle::spawn_initialized(&self.worker_path, &self.init)?;
        self.publish_kill_handle(Some(WorkerKillHandle::new(&handle)));
        // A shutdown may have swept the board while we were spawning.
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        tracing::debug!("slot {}: spawned worker {}", self.index, handle.pid());
        Ok(handle)
    }

    fn publish_kill_handle(&self, handle: Option<WorkerKillHandle>) {
        let mut board = self.kill_board.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = board.get_mut(self.index) {
            *entry = handle;
        }
    }
}
