//! Inter-process communication with `framepipe-worker` processes.
//!
//! - `protocol` - length-prefixed rkyv messages over stdin/stdout
//! - `worker` - parent-side handle to one worker process
//! - `serve` - worker-side command loop

pub mod protocol;
mod serve;
mod worker;

pub use protocol::{WorkerCommand, WorkerResponse, read_message, write_message};
pub use serve::{serve, serve_io};
pub use worker::{
    WORKER_PATH_ENV, WorkerHandle, WorkerKillHandle, died_from_interrupt, find_worker_binary,
};
