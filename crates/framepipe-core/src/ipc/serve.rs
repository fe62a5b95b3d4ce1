//! Worker side of the IPC protocol.
//!
//! `framepipe-worker` reads `WorkerCommand`s from stdin and answers on
//! stdout. An `Init` rebuilds the parent's runner from its blueprint under
//! the parent's id and registers it for local dispatch; each `Call` is then
//! dispatched against it. Hooks fired while a call runs are streamed back as
//! `Event` responses ahead of the final answer.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::components::Components;
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::events::ForwardingHooks;
use crate::execute::{self, DispatchTarget, RemoteInit, panic_message};
use crate::runner::{RUNNER_KIND, Runner};

use super::protocol::{WorkerCommand, WorkerResponse, read_message, write_message};

type SharedWriter<W> = Arc<Mutex<W>>;

fn send<W: Write>(writer: &SharedWriter<W>, response: &WorkerResponse) -> Result<()> {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    write_message(&mut *writer, response)
}

/// Serve the protocol on this process's stdin and stdout.
pub fn serve(components: Components) -> Result<()> {
    let stdin = BufReader::new(io::stdin());
    let stdout = BufWriter::new(io::stdout());
    serve_io(stdin, stdout, components)
}

/// Serve the protocol on arbitrary streams until `Shutdown` or end of input.
pub fn serve_io<R, W>(mut reader: R, writer: W, components: Components) -> Result<()>
where
    R: Read,
    W: Write + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(writer));
    // Keeps the hosted runner alive; the dispatch registry only holds a weak
    // reference.
    let mut hosted: Option<Arc<dyn DispatchTarget>> = None;

    loop {
        let command: WorkerCommand = match read_message(&mut reader) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("Worker input closed: {}", e);
                break;
            }
        };

        match command {
            WorkerCommand::Init { init } => match host(&init, &components, &writer) {
                Ok(target) => {
                    execute::register(&target);
                    hosted = Some(target);
                    send(&writer, &WorkerResponse::Ready)?;
                }
                Err(e) => {
                    tracing::error!("Worker initialization failed: {}", e);
                    send(
                        &writer,
                        &WorkerResponse::Error {
                            message: e.to_string(),
                        },
                    )?;
                }
            },
            WorkerCommand::Call { call } => {
                let method = call.method.name();
                let response = match panic::catch_unwind(AssertUnwindSafe(|| execute::dispatch(call))) {
                    Ok(Ok(result)) => WorkerResponse::Output { result },
                    Ok(Err(e)) => WorkerResponse::Error {
                        message: e.to_string(),
                    },
                    Err(payload) => WorkerResponse::Panic {
                        message: format!("{} panicked: {}", method, panic_message(payload.as_ref())),
                    },
                };
                send(&writer, &response)?;
            }
            WorkerCommand::Ping => send(&writer, &WorkerResponse::Pong)?,
            WorkerCommand::Shutdown => {
                send(&writer, &WorkerResponse::ShuttingDown)?;
                break;
            }
        }
    }

    if let Some(target) = hosted {
        execute::unregister(target.runner_id());
    }
    Ok(())
}

/// Rebuild the parent's runner inside this process.
fn host<W: Write + Send + 'static>(
    init: &RemoteInit,
    components: &Components,
    writer: &SharedWriter<W>,
) -> Result<Arc<dyn DispatchTarget>> {
    if init.kind != RUNNER_KIND {
        return Err(Error::Dispatch(format!(
            "worker cannot host a '{}'",
            init.kind
        )));
    }

    let stages = components.build(&init.blueprint)?;
    let events = writer.clone();
    let hooks = ForwardingHooks::new(move |event| {
        if let Err(e) = send(&events, &WorkerResponse::Event { event }) {
            tracing::warn!("Failed to forward hook event: {}", e);
        }
    });

    let runner: Arc<dyn DispatchTarget> = Runner::builder()
        .id(init.runner_id)
        .stages(stages)
        .hooks(Arc::new(hooks))
        .config(ExecutorConfig::synchronous())
        .build()?;
    tracing::debug!("Hosting runner {} in process {}", init.runner_id, std::process::id());
    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::components::RunnerBlueprint;
    use crate::config::PipelineConfig;
    use crate::events::HookEvent;
    use crate::execute::{LocalCall, MethodCall, MethodResult};
    use crate::media::{Frame, RunSpec};

    /// A `Write` whose bytes can be read back after the server returns.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn script(commands: &[WorkerCommand]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for command in commands {
            write_message(&mut bytes, command).unwrap();
        }
        Cursor::new(bytes)
    }

    fn responses(captured: &Captured) -> Vec<WorkerResponse> {
        let bytes = captured.0.lock().unwrap().clone();
        let mut cursor = Cursor::new(bytes);
        let mut out = Vec::new();
        while (cursor.position() as usize) < cursor.get_ref().len() {
            out.push(read_message(&mut cursor).unwrap());
        }
        out
    }

    fn init(runner_id: u64) -> RemoteInit {
        let mut config = PipelineConfig::default();
        config.estimator.set_param("landmarks", 2);
        config.estimator.set_param("fail_on", serde_json::json!([1]));
        RemoteInit {
            runner_id,
            kind: RUNNER_KIND.to_string(),
            blueprint: RunnerBlueprint::from_config(&config).unwrap(),
        }
    }

    fn frame_call(runner_id: u64, index: usize) -> WorkerCommand {
        WorkerCommand::Call {
            call: LocalCall {
                runner_id,
                kind: RUNNER_KIND.to_string(),
                method: MethodCall::ProcessFrame {
                    spec: RunSpec::new("/clip.raw", "/out/clip").unwrap(),
                    index,
                    frame: Frame::raw(2, 1, 1, vec![3, 4]).unwrap(),
                },
            },
        }
    }

    #[test]
    fn test_serves_frame_calls_with_events() {
        let id = 0xfeed_0001;
        let input = script(&[
            WorkerCommand::Ping,
            WorkerCommand::Init { init: init(id) },
            frame_call(id, 0),
            frame_call(id, 1),
            WorkerCommand::Shutdown,
        ]);
        let output = Captured::default();
        serve_io(input, output.clone(), Components::builtin()).unwrap();

        let replies = responses(&output);
        assert!(matches!(replies[0], WorkerResponse::Pong));
        assert!(matches!(replies[1], WorkerResponse::Ready));
        assert!(matches!(
            replies[2],
            WorkerResponse::Event {
                event: HookEvent::StartFrameTask { index: 0, .. }
            }
        ));
        assert!(matches!(
            replies[3],
            WorkerResponse::Event {
                event: HookEvent::EndFrameTask { index: 0, .. }
            }
        ));
        match &replies[4] {
            WorkerResponse::Output {
                result: MethodResult::Frame(result),
            } => assert_eq!(result.landmarks.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        // Frame 1 fails but still reports start and end.
        assert!(matches!(replies[5], WorkerResponse::Event { .. }));
        assert!(matches!(replies[6], WorkerResponse::Event { .. }));
        assert!(matches!(&replies[7], WorkerResponse::Error { message } if message.contains("frame 1")));
        assert!(matches!(replies[8], WorkerResponse::ShuttingDown));
        assert!(!execute::is_registered(id));
    }

    #[test]
    fn test_init_rejects_foreign_kind() {
        let mut foreign = init(0xfeed_0002);
        foreign.kind = "other.Thing".to_string();
        let input = script(&[WorkerCommand::Init { init: foreign }]);
        let output = Captured::default();
        serve_io(input, output.clone(), Components::builtin()).unwrap();

        let replies = responses(&output);
        assert!(matches!(&replies[0], WorkerResponse::Error { message } if message.contains("other.Thing")));
    }

    #[test]
    fn test_call_without_init_is_an_error() {
        let input = script(&[frame_call(0xfeed_0003, 0)]);
        let output = Captured::default();
        serve_io(input, output.clone(), Components::builtin()).unwrap();

        let replies = responses(&output);
        assert!(matches!(&replies[0], WorkerResponse::Error { message } if message.contains("not registered")));
    }
}
