//! The runner: two-level scheduling of items and frames.
//!
//! `run(root)` sends a directory through [`Runner::run_batch`] (one task per
//! item) and anything else through [`Runner::run_single`]. Each item is opened
//! as a lazy frame sequence and fed to [`Runner::process_frames`] (one task
//! per frame). Which of the two levels runs in parallel is decided by the
//! executor configuration; the other level runs synchronously.

mod batch;
mod frames;

pub use batch::enumerate;
pub use frames::OrderedResults;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rustc_hash::FxHashMap;

use crate::components::{RunnerBlueprint, Stages};
use crate::config::{ExecutionMode, ExecutorConfig};
use crate::error::{Error, Result};
use crate::events::{NoopHooks, RunnerHooks, TaskGuard};
use crate::execute::{
    self, AbortHandle, DispatchTarget, Executor, LocalCall, MethodCall, MethodResult, RemoteInit,
    RunnerId,
};
use crate::interrupt;
use crate::media::{ItemSummary, RunSpec};
use crate::stages::{Collector, Estimator, MediaOpener};

/// Type tag carried by every `LocalCall` addressed to a `Runner`.
pub const RUNNER_KIND: &str = "framepipe.Runner";

static NEXT_RUNNER: AtomicU32 = AtomicU32::new(1);

fn next_runner_id() -> RunnerId {
    ((std::process::id() as u64) << 32) | NEXT_RUNNER.fetch_add(1, Ordering::Relaxed) as u64
}

/// How a top-level run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Interrupted, and the interrupt hook chose not to re-raise.
    Interrupted,
    /// Failed, and the exception hook chose not to re-raise.
    Failed,
}

/// Outcome of [`Runner::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub items: Vec<ItemSummary>,
    /// Candidates rejected by the collector's exist rule.
    pub skipped: usize,
    pub status: RunStatus,
}

impl RunReport {
    fn ended(status: RunStatus) -> Self {
        Self {
            items: Vec::new(),
            skipped: 0,
            status,
        }
    }

    /// Total number of frame results handed to the collector.
    pub fn frames(&self) -> usize {
        self.items.iter().map(|item| item.frames).sum()
    }
}

/// Result of a batch pass before terminal hooks run.
pub(crate) struct BatchOutcome {
    pub items: Vec<ItemSummary>,
    pub skipped: usize,
}

/// Orchestrates one pipeline: an opener, an estimator and a collector.
///
/// Runners are always held in an `Arc` so executors can register them for
/// local dispatch.
pub struct Runner {
    id: RunnerId,
    estimator: Arc<dyn Estimator>,
    collector: Arc<dyn Collector>,
    opener: Arc<dyn MediaOpener>,
    hooks: Arc<dyn RunnerHooks>,
    config: ExecutorConfig,
    blueprint: Option<RunnerBlueprint>,
    executors: Mutex<FxHashMap<ExecutionMode, Arc<Executor>>>,
    abort: AbortHandle,
    handle_interrupts: bool,
    this: Weak<Runner>,
}

/// Builder for [`Runner`].
#[derive(Default)]
pub struct RunnerBuilder {
    id: Option<RunnerId>,
    estimator: Option<Arc<dyn Estimator>>,
    collector: Option<Arc<dyn Collector>>,
    opener: Option<Arc<dyn MediaOpener>>,
    hooks: Option<Arc<dyn RunnerHooks>>,
    config: ExecutorConfig,
    blueprint: Option<RunnerBlueprint>,
    handle_interrupts: bool,
}

impl RunnerBuilder {
    /// Reuse an existing id (worker processes host copies under the parent's id).
    pub fn id(mut self, id: RunnerId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn Estimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn opener(mut self, opener: Arc<dyn MediaOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn stages(self, stages: Stages) -> Self {
        self.estimator(stages.estimator)
            .collector(stages.collector)
            .opener(stages.opener)
    }

    pub fn hooks(mut self, hooks: Arc<dyn RunnerHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Description that lets process pools rebuild this runner in a worker.
    pub fn blueprint(mut self, blueprint: RunnerBlueprint) -> Self {
        self.blueprint = Some(blueprint);
        self
    }

    /// Install the SIGINT handler for the duration of each `run`.
    pub fn handle_interrupts(mut self, enabled: bool) -> Self {
        self.handle_interrupts = enabled;
        self
    }

    pub fn build(self) -> Result<Arc<Runner>> {
        self.config.validate()?;
        let missing = |stage: &str| Error::Config(format!("runner has no {}", stage));
        let estimator = self.estimator.ok_or_else(|| missing("estimator"))?;
        let collector = self.collector.ok_or_else(|| missing("collector"))?;
        let opener = self.opener.ok_or_else(|| missing("opener"))?;
        let hooks = self.hooks.unwrap_or_else(|| Arc::new(NoopHooks));
        let id = self.id.unwrap_or_else(next_runner_id);

        Ok(Arc::new_cyclic(|this| Runner {
            id,
            estimator,
            collector,
            opener,
            hooks,
            config: self.config,
            blueprint: self.blueprint,
            executors: Mutex::new(FxHashMap::default()),
            abort: AbortHandle::new(),
            handle_interrupts: self.handle_interrupts,
            this: this.clone(),
        }))
    }
}

/// Force-shuts-down every executor created during a top-level call.
struct ExecutorScope<'a> {
    runner: &'a Runner,
}

impl Drop for ExecutorScope<'_> {
    fn drop(&mut self) {
        let executors: Vec<_> = self.runner.executors().drain().collect();
        for (mode, executor) in executors {
            tracing::debug!("Shutting down {} executor for {} mode", executor.name(), mode);
            executor.shutdown(false, true);
        }
    }
}

impl Runner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    pub fn id(&self) -> RunnerId {
        self.id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<dyn RunnerHooks> {
        &self.hooks
    }

    /// Handle that stops the current run at the next wait or submission.
    ///
    /// An abort requested before `run` stops that run immediately. The flag
    /// is cleared when a run returns.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Process `source`: a directory as a batch, anything else as one item.
    ///
    /// Terminal hooks decide whether an interrupt or failure is re-raised;
    /// `on_finally` always fires last.
    pub fn run(&self, source: &RunSpec) -> Result<RunReport> {
        let result = self.run_guarded(source);
        self.abort.reset();
        self.hooks.on_finally();
        result
    }

    fn run_guarded(&self, source: &RunSpec) -> Result<RunReport> {
        let _interrupts = if self.handle_interrupts {
            Some(interrupt::install()?)
        } else {
            None
        };

        tracing::info!("Running {}", source);
        let outcome = {
            let _scope = ExecutorScope { runner: self };
            if source.is_directory() {
                self.run_batch(source)
            } else {
                self.run_single(source).map(|item| BatchOutcome {
                    items: vec![item],
                    skipped: 0,
                })
            }
        };

        match outcome {
            Ok(outcome) => {
                self.hooks.on_complete();
                Ok(RunReport {
                    items: outcome.items,
                    skipped: outcome.skipped,
                    status: RunStatus::Completed,
                })
            }
            Err(e) if e.is_interrupt() => {
                tracing::warn!("Run of {} interrupted", source);
                self.hooks.on_keyboard_interrupt()?;
                Ok(RunReport::ended(RunStatus::Interrupted))
            }
            Err(e) => {
                tracing::debug!("Run of {} failed: {}", source, e);
                self.hooks.on_general_exception(e)?;
                Ok(RunReport::ended(RunStatus::Failed))
            }
        }
    }

    /// Process one item end to end and hand its results to the collector.
    pub fn run_single(&self, spec: &RunSpec) -> Result<ItemSummary> {
        let kind = crate::media::MediaKind::classify(spec)?;
        tracing::debug!("Opening {} as {:?}", spec, kind);
        let frames = self.opener.open(spec, kind)?;
        let results = self
            .process_frames(spec, frames)?
            .collect::<Result<Vec<_>>>()?;
        let count = results.len();
        self.collector.collect_results(spec, results)?;
        Ok(ItemSummary {
            spec: spec.clone(),
            frames: count,
        })
    }

    fn executors(&self) -> MutexGuard<'_, FxHashMap<ExecutionMode, Arc<Executor>>> {
        self.executors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The executor for `mode`, created on first use.
    pub(crate) fn executor(&self, mode: ExecutionMode) -> Result<Arc<Executor>> {
        let mut executors = self.executors();
        if let Some(executor) = executors.get(&mode) {
            return Ok(executor.clone());
        }
        let target = self.target()?;
        let executor = Arc::new(execute::configure(&self.config, mode, &target)?);
        tracing::debug!(
            "Created {} executor ({} workers) for {} mode",
            executor.name(),
            executor.max_workers(),
            mode
        );
        executors.insert(mode, executor.clone());
        Ok(executor)
    }

    fn target(&self) -> Result<Arc<dyn DispatchTarget>> {
        let this: Arc<dyn DispatchTarget> = self
            .this
            .upgrade()
            .ok_or_else(|| Error::Dispatch(format!("runner {} is being dropped", self.id)))?;
        Ok(this)
    }

    pub(crate) fn call(&self, method: MethodCall) -> LocalCall {
        LocalCall {
            runner_id: self.id,
            kind: RUNNER_KIND.to_string(),
            method,
        }
    }
}

impl DispatchTarget for Runner {
    fn runner_id(&self) -> RunnerId {
        self.id
    }

    fn kind(&self) -> &str {
        RUNNER_KIND
    }

    fn invoke(&self, method: MethodCall) -> Result<MethodResult> {
        match method {
            MethodCall::ProcessFrame { spec, index, frame } => self
                .process_frame(&spec, index, &frame)
                .map(MethodResult::Frame),
            MethodCall::RunSingle { spec } => {
                let _task = TaskGuard::batch(self.hooks.as_ref(), &spec);
                self.run_single(&spec).map(MethodResult::Item)
            }
        }
    }

    fn remote_init(&self) -> Option<RemoteInit> {
        self.blueprint.as_ref().map(|blueprint| RemoteInit {
            runner_id: self.id,
            kind: RUNNER_KIND.to_string(),
            blueprint: blueprint.clone(),
        })
    }

    fn event_sink(&self) -> Arc<dyn RunnerHooks> {
        self.hooks.clone()
    }
}
