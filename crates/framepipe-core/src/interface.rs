//! Entry point that ties configuration, components and the runner together.

use std::path::Path;
use std::sync::Arc;

use crate::builtin::ProgressHooks;
use crate::components::{Components, RunnerBlueprint};
use crate::config::{ConfigOverrides, PipelineConfig};
use crate::error::Result;
use crate::events::{NoopHooks, RunnerHooks};
use crate::media::RunSpec;
use crate::render::ProxyManager;
use crate::runner::{RunReport, Runner};

/// Builds a runner from a [`PipelineConfig`] and runs one source through it.
pub struct Interface {
    config: PipelineConfig,
    components: Components,
    hooks: Arc<dyn RunnerHooks>,
}

impl Interface {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            components: Components::builtin(),
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Merge command-line overrides into a base configuration.
    pub fn configure(base: PipelineConfig, overrides: ConfigOverrides) -> Result<Self> {
        Ok(Self::new(base.merge(overrides)?))
    }

    /// Resolve component names against `components` instead of the builtins.
    ///
    /// Worker processes always use the builtin registry, so custom components
    /// only work with thread or synchronous executors.
    pub fn with_components(mut self, components: Components) -> Self {
        self.components = components;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RunnerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `source` (a path or a capture device index) into `destination`.
    pub fn run(&self, source: &str, destination: impl AsRef<Path>) -> Result<RunReport> {
        let spec = RunSpec::parse(source, destination)?;
        let blueprint = RunnerBlueprint::from_config(&self.config)?;
        let stages = self.components.build(&blueprint)?;

        let proxy = if self.config.progress {
            Some(ProxyManager::start()?)
        } else {
            None
        };
        let hooks: Arc<dyn RunnerHooks> = match &proxy {
            Some(manager) => Arc::new(ProgressHooks::new(manager.handle(), self.hooks.clone())?),
            None => self.hooks.clone(),
        };

        let runner = Runner::builder()
            .stages(stages)
            .hooks(hooks)
            .config(self.config.executor.clone())
            .blueprint(blueprint)
            .handle_interrupts(self.config.handle_interrupts)
            .build()?;
        tracing::debug!(
            "Runner {} using {} executor for {} mode",
            runner.id(),
            self.config.executor.kind,
            self.config.executor.mode
        );

        let report = runner.run(&spec);
        drop(runner);
        if let Some(manager) = proxy {
            manager.shutdown();
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    use crate::config::{ExecutionMode, ExecutorKind};
    use crate::runner::RunStatus;

    fn quiet() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.progress = false;
        config.handle_interrupts = false;
        config.opener.set_param("width", 2);
        config.opener.set_param("height", 2);
        config.opener.set_param("channels", 1);
        config
    }

    #[test]
    fn test_runs_batch_with_thread_frames() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.raw"), vec![1u8; 8]).unwrap();
        fs::write(src.join("b.raw"), vec![2u8; 12]).unwrap();

        let overrides = ConfigOverrides {
            mode: Some(ExecutionMode::Frames),
            kind: Some(ExecutorKind::Thread),
            max_parallel: Some(2),
            ..ConfigOverrides::default()
        };
        let interface = Interface::configure(quiet(), overrides).unwrap();
        let dst = temp.path().join("dst");
        let report = interface.run(src.to_str().unwrap(), &dst).unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.frames(), 5);
        assert!(dst.join("a.json").exists());
        assert!(dst.join("b.json").exists());

        // A second run skips both items.
        let again = interface.run(src.to_str().unwrap(), &dst).unwrap();
        assert_eq!(again.skipped, 2);
        assert!(again.items.is_empty());
    }

    #[test]
    fn test_progress_does_not_change_results() {
        let temp = TempDir::new().unwrap();
        let clip = temp.path().join("clip.raw");
        fs::write(&clip, vec![0u8; 4 * 3]).unwrap();

        let mut config = quiet();
        config.progress = true;
        let report = Interface::new(config)
            .run(clip.to_str().unwrap(), temp.path().join("clip"))
            .unwrap();
        assert_eq!(report.frames(), 3);
    }

    #[test]
    fn test_unknown_component_fails_before_running() {
        let mut config = quiet();
        config.collector.name = "csv".to_string();
        let err = Interface::new(config).run("/nowhere.raw", "/tmp/out").unwrap_err();
        assert!(matches!(err, crate::Error::Component(_)));
    }
}
