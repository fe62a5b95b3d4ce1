//! Integration tests for the process pool, running real `framepipe-worker`
//! processes built alongside this crate.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use framepipe_core::{
    Error, ExecutionMode, ExecutorConfig, ExecutorKind, FailureAction, Interface, PipelineConfig,
    ProcessResult, RunSpec, RunStatus, RunnerHooks,
};
use tempfile::TempDir;

const WORKER: &str = env!("CARGO_BIN_EXE_framepipe-worker");

fn write_clip(path: &Path, frames: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut data = Vec::with_capacity(frames * 4);
    for index in 0..frames {
        data.extend_from_slice(&[index as u8; 4]);
    }
    fs::write(path, data).unwrap();
}

fn pool_config(mode: ExecutionMode, workers: usize, estimator: serde_json::Value) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.progress = false;
    config.handle_interrupts = false;
    config.executor = ExecutorConfig::new(mode, ExecutorKind::Process, workers);
    config.executor.worker_path = Some(WORKER.to_string());
    config.opener.set_param("width", 2);
    config.opener.set_param("height", 2);
    config.opener.set_param("channels", 1);
    config.estimator.params = estimator;
    config
}

fn read_frames(path: &Path) -> Vec<usize> {
    let text = fs::read_to_string(path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&text).unwrap();
    document["frames"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["frame_id"].as_u64().unwrap() as usize)
        .collect()
}

/// Counts hook calls; optionally ignores failed frames.
#[derive(Default)]
struct Tally {
    ignore_failures: bool,
    started: Mutex<Vec<usize>>,
    ended: Mutex<Vec<usize>>,
    failures: Mutex<Vec<String>>,
    successes: Mutex<usize>,
    frame_jobs: Mutex<(usize, usize)>,
}

impl RunnerHooks for Tally {
    fn on_start_frame_job(&self, _spec: &RunSpec) {
        self.frame_jobs.lock().unwrap().0 += 1;
    }

    fn on_end_frame_job(&self, _spec: &RunSpec) {
        self.frame_jobs.lock().unwrap().1 += 1;
    }

    fn on_start_frame_task(&self, _spec: &RunSpec, index: usize) {
        self.started.lock().unwrap().push(index);
    }

    fn on_end_frame_task(&self, _spec: &RunSpec, index: usize) {
        self.ended.lock().unwrap().push(index);
    }

    fn on_success_frame_task(&self, _spec: &RunSpec, _index: usize, _result: &ProcessResult) {
        *self.successes.lock().unwrap() += 1;
    }

    fn on_failure_frame_task(&self, _spec: &RunSpec, index: usize, error: &Error) -> FailureAction {
        self.failures.lock().unwrap().push(format!("{}: {}", index, error));
        if self.ignore_failures {
            FailureAction::Ignore
        } else {
            FailureAction::Raise
        }
    }
}

#[test]
fn test_frames_on_process_pool_keep_order() {
    let temp = TempDir::new().unwrap();
    let clip = temp.path().join("clip.raw");
    write_clip(&clip, 6);

    let tally = Arc::new(Tally::default());
    let config = pool_config(ExecutionMode::Frames, 2, serde_json::json!({"landmarks": 2}));
    let report = Interface::new(config)
        .with_hooks(tally.clone())
        .run(clip.to_str().unwrap(), temp.path().join("out/clip"))
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.frames(), 6);
    assert_eq!(read_frames(&temp.path().join("out/clip.json")), vec![0, 1, 2, 3, 4, 5]);

    // Start and end hooks fire inside the workers and are forwarded back.
    let mut started = tally.started.lock().unwrap().clone();
    started.sort_unstable();
    assert_eq!(started, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(tally.ended.lock().unwrap().len(), 6);
    assert_eq!(*tally.successes.lock().unwrap(), 6);
    assert_eq!(*tally.frame_jobs.lock().unwrap(), (1, 1));
}

#[test]
fn test_failed_frame_cancels_slow_workers() {
    let temp = TempDir::new().unwrap();
    let clip = temp.path().join("clip.raw");
    write_clip(&clip, 5);

    // Frames 0-3 run together; frame 4 starts when frame 3 fails.
    let tally = Arc::new(Tally::default());
    let config = pool_config(
        ExecutionMode::Frames,
        4,
        serde_json::json!({"landmarks": 2, "delay_ms": 2000, "fail_on": [3]}),
    );

    let start = Instant::now();
    let err = Interface::new(config)
        .with_hooks(tally.clone())
        .run(clip.to_str().unwrap(), temp.path().join("out/clip"))
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.to_string().contains("synthetic failure on frame 3"), "{}", err);
    // Letting frame 4 finish would take about four seconds.
    assert!(elapsed < Duration::from_millis(3500), "took {:?}", elapsed);
    assert_eq!(*tally.successes.lock().unwrap(), 3);
    assert!(!temp.path().join("out/clip.json").exists());
    assert_eq!(*tally.frame_jobs.lock().unwrap(), (1, 1));
}

#[test]
fn test_crashed_worker_is_replaced() {
    let temp = TempDir::new().unwrap();
    let clip = temp.path().join("clip.raw");
    write_clip(&clip, 5);

    let tally = Arc::new(Tally {
        ignore_failures: true,
        ..Tally::default()
    });
    let config = pool_config(
        ExecutionMode::Frames,
        1,
        serde_json::json!({"landmarks": 2, "crash_on": [1]}),
    );
    let report = Interface::new(config)
        .with_hooks(tally.clone())
        .run(clip.to_str().unwrap(), temp.path().join("out/clip"))
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(read_frames(&temp.path().join("out/clip.json")), vec![0, 2, 3, 4]);

    let failures = tally.failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("1: worker process crashed"), "{}", failures[0]);
}

#[test]
fn test_batch_on_process_pool() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_clip(&src.join("a.raw"), 2);
    write_clip(&src.join("b.raw"), 3);
    write_clip(&src.join("deep/c.raw"), 4);
    let dst = temp.path().join("dst");

    let config = pool_config(ExecutionMode::Batch, 2, serde_json::json!({"landmarks": 2}));
    let report = Interface::new(config)
        .run(src.to_str().unwrap(), &dst)
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.items.len(), 3);
    assert_eq!(report.frames(), 9);
    assert_eq!(read_frames(&dst.join("a.json")).len(), 2);
    assert_eq!(read_frames(&dst.join("b.json")).len(), 3);
    assert_eq!(read_frames(&dst.join("deep/c.json")).len(), 4);
}

#[test]
fn test_missing_worker_binary_fails_run() {
    let temp = TempDir::new().unwrap();
    let clip = temp.path().join("clip.raw");
    write_clip(&clip, 2);

    let mut config = pool_config(ExecutionMode::Frames, 2, serde_json::json!({}));
    config.executor.worker_path = Some(temp.path().join("no-such-worker").display().to_string());
    let result = Interface::new(config).run(clip.to_str().unwrap(), temp.path().join("out"));

    assert!(result.is_err());
}
