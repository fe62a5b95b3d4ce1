//! Start/end guards.
//!
//! Constructing a guard fires the start hook; dropping it fires the matching
//! end hook, so the end hook also runs on early return, error and unwinding.

use std::sync::Arc;

use crate::media::RunSpec;

use super::RunnerHooks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Batch,
    Frame,
}

/// Guards a batch or frame job.
pub struct JobGuard {
    hooks: Arc<dyn RunnerHooks>,
    spec: RunSpec,
    level: Level,
}

impl JobGuard {
    pub fn batch(hooks: Arc<dyn RunnerHooks>, source: &RunSpec) -> Self {
        hooks.on_start_batch_job(source);
        Self {
            hooks,
            spec: source.clone(),
            level: Level::Batch,
        }
    }

    pub fn frame(hooks: Arc<dyn RunnerHooks>, spec: &RunSpec) -> Self {
        hooks.on_start_frame_job(spec);
        Self {
            hooks,
            spec: spec.clone(),
            level: Level::Frame,
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        match self.level {
            Level::Batch => self.hooks.on_end_batch_job(&self.spec),
            Level::Frame => self.hooks.on_end_frame_job(&self.spec),
        }
    }
}

/// Guards the body of one batch or frame task.
pub struct TaskGuard<'a> {
    hooks: &'a dyn RunnerHooks,
    spec: &'a RunSpec,
    index: Option<usize>,
}

impl<'a> TaskGuard<'a> {
    pub fn batch(hooks: &'a dyn RunnerHooks, spec: &'a RunSpec) -> Self {
        hooks.on_start_batch_task(spec);
        Self {
            hooks,
            spec,
            index: None,
        }
    }

    pub fn frame(hooks: &'a dyn RunnerHooks, spec: &'a RunSpec, index: usize) -> Self {
        hooks.on_start_frame_task(spec, index);
        Self {
            hooks,
            spec,
            index: Some(index),
        }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        match self.index {
            None => self.hooks.on_end_batch_task(self.spec),
            Some(index) => self.hooks.on_end_frame_task(self.spec, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl RunnerHooks for Recorder {
        fn on_start_batch_job(&self, _source: &RunSpec) {
            self.calls.lock().unwrap().push("start_batch_job".to_string());
        }
        fn on_end_batch_job(&self, _source: &RunSpec) {
            self.calls.lock().unwrap().push("end_batch_job".to_string());
        }
        fn on_start_frame_task(&self, _spec: &RunSpec, index: usize) {
            self.calls.lock().unwrap().push(format!("start_frame_task {}", index));
        }
        fn on_end_frame_task(&self, _spec: &RunSpec, index: usize) {
            self.calls.lock().unwrap().push(format!("end_frame_task {}", index));
        }
    }

    #[test]
    fn test_job_guard_pairs_start_and_end() {
        let recorder = Arc::new(Recorder::default());
        let spec = RunSpec::new("/in", "/out").unwrap();
        {
            let _guard = JobGuard::batch(recorder.clone(), &spec);
        }
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["start_batch_job", "end_batch_job"]
        );
    }

    #[test]
    fn test_task_guard_ends_on_panic() {
        let recorder = Recorder::default();
        let spec = RunSpec::new("/in", "/out").unwrap();
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = TaskGuard::frame(&recorder, &spec, 4);
            panic!("estimator blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["start_frame_task 4", "end_frame_task 4"]
        );
    }
}
