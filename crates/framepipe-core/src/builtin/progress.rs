use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::events::{FailureAction, RunnerHooks};
use crate::media::{ItemSummary, ProcessResult, RunSpec};
use crate::render::{Encodable, ProxyHandle, Renderable, RenderableRef, arg};

const BAR_TEMPLATE: &str = "{msg:>12} [{elapsed_precise}] [{bar:24.cyan/blue}] {pos}/{len}";

#[derive(Debug, Clone, Serialize)]
struct Bar {
    label: String,
    done: u64,
    total: Option<u64>,
}

/// Console progress bars.
///
/// Lives on the render thread. Methods: `add_bar(label) -> index`,
/// `set_total(index, total)`, `advance(index, n)`, `reset(index, label)`,
/// `snapshot() -> bars`, `finish()`.
pub struct ConsoleProgress {
    multi: MultiProgress,
    bars: Vec<ProgressBar>,
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new(ProgressDrawTarget::stderr())
    }
}

impl ConsoleProgress {
    pub fn new(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Vec::new(),
        }
    }

    /// Bars that track state without drawing.
    pub fn hidden() -> Self {
        Self::new(ProgressDrawTarget::hidden())
    }

    fn bar(&self, index: usize) -> Result<&ProgressBar> {
        self.bars
            .get(index)
            .ok_or_else(|| Error::Proxy(format!("no progress bar {}", index)))
    }

    fn add_bar(&mut self, label: String) -> Result<usize> {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .map_err(|e| Error::Proxy(format!("bad progress template: {}", e)))?
            .progress_chars("#>-");
        let bar = self.multi.add(ProgressBar::no_length());
        bar.set_style(style);
        bar.set_message(label);
        self.bars.push(bar);
        Ok(self.bars.len() - 1)
    }

    fn snapshot(&self) -> Vec<Bar> {
        self.bars
            .iter()
            .map(|bar| Bar {
                label: bar.message(),
                done: bar.position(),
                total: bar.length(),
            })
            .collect()
    }
}

impl Renderable for ConsoleProgress {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Box<dyn Encodable>> {
        match method {
            "add_bar" => {
                let label: String = arg(args, 0, method)?;
                Ok(Box::new(self.add_bar(label)?))
            }
            "set_total" => {
                let index: usize = arg(args, 0, method)?;
                let total: u64 = arg(args, 1, method)?;
                self.bar(index)?.set_length(total);
                Ok(Box::new(()))
            }
            "advance" => {
                let index: usize = arg(args, 0, method)?;
                let step: u64 = arg(args, 1, method)?;
                self.bar(index)?.inc(step);
                Ok(Box::new(()))
            }
            "reset" => {
                let index: usize = arg(args, 0, method)?;
                let label: String = arg(args, 1, method)?;
                let bar = self.bar(index)?;
                bar.reset();
                bar.unset_length();
                bar.set_message(label);
                Ok(Box::new(()))
            }
            "snapshot" => Ok(Box::new(self.snapshot())),
            "finish" => {
                for bar in &self.bars {
                    bar.abandon();
                }
                Ok(Box::new(()))
            }
            other => Err(Error::Proxy(format!("ConsoleProgress has no method '{}'", other))),
        }
    }
}

/// Drives an item bar and a frame bar from runner lifecycle events.
///
/// Wraps another hooks object and forwards every call to it, so failure
/// policy and terminal handling stay with the wrapped hooks. Drawing
/// errors are logged and otherwise ignored.
pub struct ProgressHooks {
    proxy: ProxyHandle,
    display: RenderableRef<ConsoleProgress>,
    items: usize,
    frames: usize,
    inner: Arc<dyn RunnerHooks>,
}

impl ProgressHooks {
    pub fn new(proxy: ProxyHandle, inner: Arc<dyn RunnerHooks>) -> Result<Self> {
        Self::with_display(proxy, inner, ConsoleProgress::default)
    }

    /// Use a custom display factory (it runs on the render thread).
    pub fn with_display(
        proxy: ProxyHandle,
        inner: Arc<dyn RunnerHooks>,
        factory: impl FnOnce() -> ConsoleProgress + Send + 'static,
    ) -> Result<Self> {
        let (display, items, frames) = proxy.with_client(|client| {
            let display = client.initialize(factory)?;
            let items = client.call_method(&display, "add_bar", vec![Value::from("items")])?;
            let frames = client.call_method(&display, "add_bar", vec![Value::from("frames")])?;
            Ok((display, items, frames))
        })?;
        let as_index = |value: Value| {
            serde_json::from_value::<usize>(value).map_err(|e| Error::Proxy(e.to_string()))
        };
        Ok(Self {
            proxy,
            display,
            items: as_index(items)?,
            frames: as_index(frames)?,
            inner,
        })
    }

    pub fn display(&self) -> RenderableRef<ConsoleProgress> {
        self.display
    }

    fn send(&self, method: &str, args: Vec<Value>) {
        let display = self.display;
        if let Err(e) = self
            .proxy
            .with_client(|client| client.call_method(&display, method, args))
        {
            tracing::debug!("progress update '{}' dropped: {}", method, e);
        }
    }
}

impl RunnerHooks for ProgressHooks {
    fn on_start_batch_job(&self, source: &RunSpec) {
        self.inner.on_start_batch_job(source);
    }

    fn on_determined_batch_task_count(&self, source: &RunSpec, count: usize) {
        self.send("set_total", vec![Value::from(self.items), Value::from(count)]);
        self.inner.on_determined_batch_task_count(source, count);
    }

    fn on_submit_batch_task(&self, spec: &RunSpec) {
        self.inner.on_submit_batch_task(spec);
    }

    fn on_start_batch_task(&self, spec: &RunSpec) {
        self.inner.on_start_batch_task(spec);
    }

    fn on_end_batch_task(&self, spec: &RunSpec) {
        self.send("advance", vec![Value::from(self.items), Value::from(1)]);
        self.inner.on_end_batch_task(spec);
    }

    fn on_success_batch_task(&self, spec: &RunSpec, summary: &ItemSummary) {
        self.inner.on_success_batch_task(spec, summary);
    }

    fn on_failure_batch_task(&self, spec: &RunSpec, error: &Error) -> FailureAction {
        self.inner.on_failure_batch_task(spec, error)
    }

    fn on_end_batch_job(&self, source: &RunSpec) {
        self.inner.on_end_batch_job(source);
    }

    fn on_start_frame_job(&self, spec: &RunSpec) {
        let label = spec
            .source_path()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frames".to_string());
        self.send("reset", vec![Value::from(self.frames), Value::from(label)]);
        self.inner.on_start_frame_job(spec);
    }

    fn on_determined_frame_task_count(&self, spec: &RunSpec, count: usize) {
        self.send("set_total", vec![Value::from(self.frames), Value::from(count)]);
        self.inner.on_determined_frame_task_count(spec, count);
    }

    fn on_submit_frame_task(&self, spec: &RunSpec, index: usize) {
        self.inner.on_submit_frame_task(spec, index);
    }

    fn on_start_frame_task(&self, spec: &RunSpec, index: usize) {
        self.inner.on_start_frame_task(spec, index);
    }

    fn on_end_frame_task(&self, spec: &RunSpec, index: usize) {
        self.inner.on_end_frame_task(spec, index);
    }

    fn on_success_frame_task(&self, spec: &RunSpec, index: usize, result: &ProcessResult) {
        self.send("advance", vec![Value::from(self.frames), Value::from(1)]);
        self.inner.on_success_frame_task(spec, index, result);
    }

    fn on_failure_frame_task(&self, spec: &RunSpec, index: usize, error: &Error) -> FailureAction {
        self.send("advance", vec![Value::from(self.frames), Value::from(1)]);
        self.inner.on_failure_frame_task(spec, index, error)
    }

    fn on_end_frame_job(&self, spec: &RunSpec) {
        self.inner.on_end_frame_job(spec);
    }

    fn on_keyboard_interrupt(&self) -> Result<()> {
        self.inner.on_keyboard_interrupt()
    }

    fn on_general_exception(&self, error: Error) -> Result<()> {
        self.inner.on_general_exception(error)
    }

    fn on_complete(&self) {
        self.inner.on_complete();
    }

    fn on_finally(&self) {
        self.send("finish", Vec::new());
        self.inner.on_finally();
    }
}
