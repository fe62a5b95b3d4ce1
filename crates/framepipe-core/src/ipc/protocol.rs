//! IPC protocol between the process pool and `framepipe-worker`.
//!
//! Uses length-prefixed rkyv messages over the worker's stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::HookEvent;
use crate::execute::{LocalCall, MethodResult, RemoteInit};

/// Largest message accepted from the other side (100MB).
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Command sent from parent to worker process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Rebuild the calling runner inside the worker and register it.
    Init {
        init: RemoteInit,
    },

    /// Run one task against the registered runner.
    Call {
        call: LocalCall,
    },

    /// Shutdown the worker process gracefully.
    Shutdown,

    /// Ping to check if worker is alive.
    Ping,
}

/// Response sent from worker to parent process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Runner rebuilt and registered.
    Ready,

    /// Task completed successfully.
    Output {
        result: MethodResult,
    },

    /// A lifecycle hook fired inside the worker. Zero or more of these
    /// precede the final response to a `Call`.
    Event {
        event: HookEvent,
    },

    /// Task (or initialization) failed with an error.
    Error {
        message: String,
    },

    /// Task panicked.
    Panic {
        message: String,
    },

    /// Response to Ping command.
    Pong,

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!(
            "IPC message too large: {} bytes",
            bytes.len()
        )));
    }

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// # Safety
///
/// Uses unchecked deserialization. Only safe when reading from trusted
/// sources: our own worker processes or the parent that spawned us.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    // rkyv wants an aligned buffer for unchecked access.
    let mut bytes = rkyv::util::AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    // SAFETY: both ends of the pipe are framepipe processes speaking this
    // protocol version.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&bytes) }
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::components::{RunnerBlueprint, WireComponent};
    use crate::config::ExecutorConfig;
    use crate::execute::MethodCall;
    use crate::media::{Frame, ProcessResult, RunSpec};

    #[test]
    fn test_call_command_roundtrip() {
        let cmd = WorkerCommand::Call {
            call: LocalCall {
                runner_id: 77,
                kind: "framepipe.Runner".to_string(),
                method: MethodCall::ProcessFrame {
                    spec: RunSpec::new("/videos/a.raw", "/out/a").unwrap(),
                    index: 3,
                    frame: Frame::raw(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap(),
                },
            },
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerCommand = read_message(&mut cursor).unwrap();

        match decoded {
            WorkerCommand::Call { call } => {
                assert_eq!(call.runner_id, 77);
                assert_eq!(call.kind, "framepipe.Runner");
                match call.method {
                    MethodCall::ProcessFrame { spec, index, frame } => {
                        assert_eq!(spec.destination(), std::path::Path::new("/out/a"));
                        assert_eq!(index, 3);
                        assert_eq!(frame.data, vec![1, 2, 3, 4, 5, 6]);
                    }
                    other => panic!("Wrong method: {:?}", other),
                }
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_init_command_carries_blueprint() {
        let blueprint = RunnerBlueprint {
            estimator: WireComponent {
                name: "synthetic".to_string(),
                params_json: r#"{"landmarks":4}"#.to_string(),
            },
            collector: WireComponent {
                name: "null".to_string(),
                params_json: "{}".to_string(),
            },
            opener: WireComponent {
                name: "raw".to_string(),
                params_json: "{}".to_string(),
            },
            executor: ExecutorConfig::synchronous(),
        };
        let cmd = WorkerCommand::Init {
            init: RemoteInit {
                runner_id: 5,
                kind: "framepipe.Runner".to_string(),
                blueprint,
            },
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();
        let decoded: WorkerCommand = read_message(&mut Cursor::new(buf)).unwrap();

        match decoded {
            WorkerCommand::Init { init } => {
                assert_eq!(init.runner_id, 5);
                assert_eq!(init.blueprint.estimator.params_json, r#"{"landmarks":4}"#);
                assert_eq!(init.blueprint.executor, ExecutorConfig::synchronous());
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_event_then_output_stream() {
        let spec = RunSpec::new("/videos/a.raw", "/out/a").unwrap();
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &WorkerResponse::Event {
                event: HookEvent::StartFrameTask {
                    spec: spec.clone(),
                    index: 0,
                },
            },
        )
        .unwrap();
        write_message(
            &mut buf,
            &WorkerResponse::Output {
                result: MethodResult::Frame(ProcessResult {
                    frame_id: 0,
                    headers: vec!["x0".to_string()],
                    landmarks: vec![0.5],
                    annotated_frame: None,
                }),
            },
        )
        .unwrap();

        let mut cursor = Cursor::new(buf);
        let first: WorkerResponse = read_message(&mut cursor).unwrap();
        assert!(matches!(
            first,
            WorkerResponse::Event {
                event: HookEvent::StartFrameTask { index: 0, .. }
            }
        ));
        let second: WorkerResponse = read_message(&mut cursor).unwrap();
        match second {
            WorkerResponse::Output {
                result: MethodResult::Frame(result),
            } => assert_eq!(result.landmarks, vec![0.5]),
            other => panic!("Wrong response: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        let err = read_message::<_, WorkerResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::Ipc(msg) if msg.contains("too large")));
    }

    #[test]
    fn test_truncated_stream_is_ipc_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::Pong).unwrap();
        buf.truncate(buf.len() - 1);
        let err = read_message::<_, WorkerResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));
    }
}
