//! Batch-level scheduling over a source directory.

use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use walkdir::WalkDir;

use crate::config::ExecutionMode;
use crate::error::{Error, Result};
use crate::events::{FailureAction, JobGuard};
use crate::execute::{MethodCall, MethodResult, TaskFuture};
use crate::media::{ItemSummary, RunSpec, is_hidden, is_image_path, is_image_sequence_dir, is_video_path};

use super::{BatchOutcome, Runner};

/// Enumerate the run-specs under a directory source.
///
/// Entries are visited in file-name order and hidden entries are skipped. A
/// directory holding only images becomes one image-sequence spec; every other
/// recognized file becomes its own spec. Destinations mirror the source tree
/// with file extensions removed.
pub fn enumerate(root: &RunSpec) -> Result<Vec<RunSpec>> {
    let root_path = root
        .source_path()
        .ok_or_else(|| Error::Config(format!("batch source {} is not a directory", root)))?;

    let mut specs = Vec::new();
    let mut walker = WalkDir::new(root_path).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        let is_dir = entry.file_type().is_dir();

        if entry.depth() > 0 && is_hidden(path) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        let relative = path.strip_prefix(root_path).unwrap_or(Path::new(""));
        if is_dir {
            if is_image_sequence_dir(path)? {
                let destination = if entry.depth() == 0 {
                    root.destination().to_path_buf()
                } else {
                    root.destination().join(relative)
                };
                specs.push(RunSpec::new(path, destination)?);
                walker.skip_current_dir();
            }
            continue;
        }

        if is_video_path(path) || is_image_path(path) {
            let destination = root.destination().join(relative.with_extension(""));
            specs.push(RunSpec::new(path, destination)?);
        }
    }
    Ok(specs)
}

impl Runner {
    /// Run every item under a directory source, one batch task per item.
    pub(crate) fn run_batch(&self, root: &RunSpec) -> Result<BatchOutcome> {
        let _job = JobGuard::batch(self.hooks.clone(), root);

        let candidates = enumerate(root)?;
        let found = candidates.len();
        let specs: Vec<RunSpec> = candidates
            .into_iter()
            .filter(|spec| self.collector.apply_exist_rule(spec))
            .collect();
        let skipped = found - specs.len();
        tracing::info!(
            "Found {} items under {} ({} skipped)",
            specs.len(),
            root,
            skipped
        );
        self.hooks.on_determined_batch_task_count(root, specs.len());

        let executor = self.executor(ExecutionMode::Batch)?;
        let mut pending = Vec::with_capacity(specs.len());
        let mut items = Vec::with_capacity(specs.len());
        for spec in specs {
            if self.abort.is_aborted() {
                return Err(Error::Interrupted);
            }

            self.hooks.on_submit_batch_task(&spec);
            let future = executor.submit(self.call(MethodCall::RunSingle { spec: spec.clone() }));

            let action = Arc::new(OnceLock::new());
            let hooks = self.hooks.clone();
            let slot = action.clone();
            future.add_done_callback(move |outcome| match outcome {
                Ok(MethodResult::Item(summary)) => hooks.on_success_batch_task(&spec, summary),
                Ok(other) => {
                    let error = Error::Execution(format!("{} returned {:?}", spec, other));
                    let _ = slot.set(hooks.on_failure_batch_task(&spec, &error));
                }
                Err(e) => {
                    let _ = slot.set(hooks.on_failure_batch_task(&spec, e));
                }
            });

            // Synchronous executors finish during submit; settle right away so
            // a raised failure stops the pass like a plain loop would.
            if future.is_done() {
                items.extend(self.settle(future, &action)?);
            } else {
                pending.push((future, action));
            }
        }

        for (future, action) in pending {
            items.extend(self.settle(future, &action)?);
        }
        Ok(BatchOutcome { items, skipped })
    }

    fn settle(
        &self,
        future: TaskFuture<MethodResult>,
        action: &OnceLock<FailureAction>,
    ) -> Result<Option<ItemSummary>> {
        match future.wait_abortable(&self.abort) {
            Ok(MethodResult::Item(summary)) => Ok(Some(summary)),
            Ok(other) => Err(Error::Execution(format!("batch task returned {:?}", other))),
            Err(e) if e.is_interrupt() => Err(e),
            Err(e) => {
                if action.get() == Some(&FailureAction::Ignore) {
                    tracing::warn!("Ignoring failed item: {}", e);
                    return Ok(None);
                }
                Err(e)
            }
        }
    }
}
