//! Core engine for the framepipe parallel frame pipeline.
//!
//! This crate provides:
//! - Runner with batch (per item) and frame (per frame) scheduling
//! - Dummy, thread-pool and process-pool executors with forced-cancel shutdown
//! - Local dispatch of id-carrying calls to runners in pool threads and worker processes
//! - Lifecycle hooks with guard semantics, forwarded across processes
//! - Render proxy owning shared UI objects on a single thread
//! - Builtin components (synthetic estimator, JSON collector, raw-frame opener)

pub mod builtin;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod execute;
pub mod interface;
pub mod interrupt;
pub mod ipc;
pub mod media;
pub mod render;
pub mod runner;
pub mod stages;

pub use components::{Components, RunnerBlueprint, Stages};
pub use config::{
    ComponentSpec, ConfigOverrides, ExecutionMode, ExecutorConfig, ExecutorKind, PipelineConfig,
};
pub use error::{Error, Result};
pub use events::{FailureAction, NoopHooks, RunnerHooks};
pub use execute::{Executor, TaskFuture};
pub use interface::Interface;
pub use media::{Frame, FrameSequence, ItemSummary, Landmarks, MediaKind, ProcessResult, RunSpec, Source};
pub use render::{ProxyManager, Renderable, RenderableRef};
pub use runner::{RUNNER_KIND, RunReport, RunStatus, Runner, RunnerBuilder};
pub use stages::{Collector, Estimator, MediaOpener};
