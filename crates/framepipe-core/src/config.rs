//! Pipeline configuration.
//!
//! `PipelineConfig` is loaded from JSON (or built from defaults) and then
//! merged with `ConfigOverrides` coming from the command line.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which level of the pipeline gets a parallel executor.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One task per source item.
    Batch,
    /// One task per decoded frame.
    Frames,
    /// Everything runs synchronously.
    #[default]
    None,
}

/// Which backend runs parallel units.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Thread,
    Process,
    #[default]
    None,
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "batch" => Ok(ExecutionMode::Batch),
            "frames" => Ok(ExecutionMode::Frames),
            "none" => Ok(ExecutionMode::None),
            other => Err(Error::Config(format!(
                "unknown execution mode '{}' (expected batch, frames or none)",
                other
            ))),
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(ExecutorKind::Thread),
            "process" => Ok(ExecutorKind::Process),
            "none" => Ok(ExecutorKind::None),
            other => Err(Error::Config(format!(
                "unknown executor kind '{}' (expected thread, process or none)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Batch => "batch",
            ExecutionMode::Frames => "frames",
            ExecutionMode::None => "none",
        })
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutorKind::Thread => "thread",
            ExecutorKind::Process => "process",
            ExecutorKind::None => "none",
        })
    }
}

/// Executor selection and sizing.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutionMode,
    pub kind: ExecutorKind,
    /// Total parallel units available (threads, or CPUs for the process pool).
    pub max_parallel: usize,
    /// Units one process task consumes; sizes the process pool.
    pub cost_per_task: usize,
    /// Explicit path to the `framepipe-worker` binary.
    pub worker_path: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::None,
            kind: ExecutorKind::None,
            max_parallel: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cost_per_task: 1,
            worker_path: None,
        }
    }
}

impl ExecutorConfig {
    /// Shorthand for tests and embedders.
    pub fn new(mode: ExecutionMode, kind: ExecutorKind, max_parallel: usize) -> Self {
        Self {
            mode,
            kind,
            max_parallel,
            ..Self::default()
        }
    }

    /// A configuration that never parallelizes.
    pub fn synchronous() -> Self {
        Self::new(ExecutionMode::None, ExecutorKind::None, 0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cost_per_task == 0 {
            return Err(Error::Config("cost_per_task must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Whether `mode` should get a parallel executor under this configuration.
    pub fn parallel_for(&self, mode: ExecutionMode) -> bool {
        mode != ExecutionMode::None
            && self.mode == mode
            && self.kind != ExecutorKind::None
            && self.max_parallel > 0
    }

    /// Number of worker threads.
    pub fn thread_pool_size(&self) -> usize {
        self.max_parallel.max(1)
    }

    /// Number of worker processes: `max(floor(max_parallel / cost_per_task), 1)`.
    pub fn process_pool_size(&self) -> usize {
        (self.max_parallel / self.cost_per_task.max(1)).max(1)
    }
}

/// A named component with free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn set_param(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        if !self.params.is_object() {
            self.params = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = self.params.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
    }
}

/// Full configuration of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub executor: ExecutorConfig,
    pub estimator: ComponentSpec,
    pub collector: ComponentSpec,
    pub opener: ComponentSpec,
    /// Install the SIGINT handler for the duration of a run.
    pub handle_interrupts: bool,
    /// Show console progress bars.
    pub progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            estimator: ComponentSpec::new("synthetic"),
            collector: ComponentSpec::new("json"),
            opener: ComponentSpec::new("raw"),
            handle_interrupts: true,
            progress: true,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("invalid config file {}: {}", path.display(), e))
        })?;
        config.executor.validate()?;
        Ok(config)
    }

    /// Apply overrides on top of this configuration.
    pub fn merge(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(mode) = overrides.mode {
            self.executor.mode = mode;
        }
        if let Some(kind) = overrides.kind {
            self.executor.kind = kind;
        }
        if let Some(max_parallel) = overrides.max_parallel {
            self.executor.max_parallel = max_parallel;
        }
        if let Some(cost) = overrides.cost_per_task {
            self.executor.cost_per_task = cost;
        }
        if let Some(path) = overrides.worker_path {
            self.executor.worker_path = Some(path);
        }
        if let Some(overwrite) = overrides.overwrite {
            self.collector.set_param("overwrite", overwrite);
        }
        if let Some(progress) = overrides.progress {
            self.progress = progress;
        }
        self.executor.validate()?;
        Ok(self)
    }
}

/// Command-line overrides; `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<ExecutionMode>,
    pub kind: Option<ExecutorKind>,
    pub max_parallel: Option<usize>,
    pub cost_per_task: Option<usize>,
    pub worker_path: Option<String>,
    pub overwrite: Option<bool>,
    pub progress: Option<bool>,
}
