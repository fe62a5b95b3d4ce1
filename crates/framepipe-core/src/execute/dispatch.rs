//! Local dispatch of method calls by runner id.
//!
//! A task never captures a live runner. It carries `(runner_id, kind, method)`
//! and is resolved on the executing thread against a thread-local registry
//! that the executor's initializer filled in. The same `LocalCall` value can
//! therefore run inline, on a pool thread, or be serialized to a worker
//! process whose initializer rebuilt the runner under the same id.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;

use crate::components::RunnerBlueprint;
use crate::error::{Error, Result};
use crate::events::RunnerHooks;
use crate::media::{Frame, ItemSummary, ProcessResult, RunSpec};

/// Identifier of a runner instance, shared with the worker processes that host
/// a copy of it.
pub type RunnerId = u64;

/// A method invocation on a runner.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum MethodCall {
    /// Analyze one frame of an item.
    ProcessFrame {
        spec: RunSpec,
        index: usize,
        frame: Frame,
    },
    /// Process one whole item (a batch task).
    RunSingle { spec: RunSpec },
}

impl MethodCall {
    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::ProcessFrame { .. } => "process_frame",
            MethodCall::RunSingle { .. } => "run_single",
        }
    }
}

/// Serializable return value of a `MethodCall`.
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum MethodResult {
    Frame(ProcessResult),
    Item(ItemSummary),
}

/// A method call addressed to a runner by id.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct LocalCall {
    pub runner_id: RunnerId,
    /// Type tag of the target; must match the registered runner exactly.
    pub kind: String,
    pub method: MethodCall,
}

/// What a worker process needs to host a copy of a runner.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct RemoteInit {
    pub runner_id: RunnerId,
    pub kind: String,
    pub blueprint: RunnerBlueprint,
}

/// An object that executors can route `LocalCall`s to.
pub trait DispatchTarget: Send + Sync {
    fn runner_id(&self) -> RunnerId;

    fn kind(&self) -> &str;

    fn invoke(&self, method: MethodCall) -> Result<MethodResult>;

    /// Description used by process pools to rebuild this target remotely.
    /// `None` means the target cannot run in a worker process.
    fn remote_init(&self) -> Option<RemoteInit>;

    /// Hooks that receive events forwarded from worker processes.
    fn event_sink(&self) -> Arc<dyn RunnerHooks>;
}

thread_local! {
    static LOCAL_TARGETS: RefCell<FxHashMap<RunnerId, Weak<dyn DispatchTarget>>> =
        RefCell::new(FxHashMap::default());
}

/// Register `target` for dispatch on the current thread.
///
/// Only a weak reference is kept; the owner decides the target's lifetime.
pub fn register(target: &Arc<dyn DispatchTarget>) {
    let id = target.runner_id();
    LOCAL_TARGETS.with(|targets| {
        targets.borrow_mut().insert(id, Arc::downgrade(target));
    });
    tracing::debug!("Registered runner {} on {:?}", id, std::thread::current().id());
}

/// Remove a registration from the current thread.
pub fn unregister(runner_id: RunnerId) {
    LOCAL_TARGETS.with(|targets| {
        targets.borrow_mut().remove(&runner_id);
    });
}

/// Whether a live target with this id is registered on the current thread.
pub fn is_registered(runner_id: RunnerId) -> bool {
    LOCAL_TARGETS.with(|targets| {
        targets
            .borrow()
            .get(&runner_id)
            .is_some_and(|weak| weak.strong_count() > 0)
    })
}

fn resolve(runner_id: RunnerId, kind: &str) -> Result<Arc<dyn DispatchTarget>> {
    let weak = LOCAL_TARGETS.with(|targets| targets.borrow().get(&runner_id).cloned());
    let weak = weak.ok_or_else(|| {
        Error::Dispatch(format!(
            "runner {} is not registered on {:?}",
            runner_id,
            std::thread::current().id()
        ))
    })?;
    let target = weak
        .upgrade()
        .ok_or_else(|| Error::Dispatch(format!("runner {} has been dropped", runner_id)))?;

    if target.runner_id() != runner_id {
        return Err(Error::Dispatch(format!(
            "registry entry {} resolved to runner {}",
            runner_id,
            target.runner_id()
        )));
    }
    if target.kind() != kind {
        return Err(Error::Dispatch(format!(
            "runner {} is a '{}', call expects '{}'",
            runner_id,
            target.kind(),
            kind
        )));
    }
    Ok(target)
}

/// Resolve and invoke a call on the current thread.
pub fn dispatch(call: LocalCall) -> Result<MethodResult> {
    let target = resolve(call.runner_id, &call.kind)?;
    target.invoke(call.method)
}

/// `dispatch`, converting a panic in the method body into an error.
pub fn dispatch_catching(call: LocalCall) -> Result<MethodResult> {
    let method = call.method.name();
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch(call))) {
        Ok(result) => result,
        Err(payload) => Err(Error::Execution(format!(
            "{} panicked: {}",
            method,
            panic_message(payload.as_ref())
        ))),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopHooks;
    use crate::media::ItemSummary;

    struct Echo {
        id: RunnerId,
        kind: &'static str,
    }

    impl DispatchTarget for Echo {
        fn runner_id(&self) -> RunnerId {
            self.id
        }

        fn kind(&self) -> &str {
            self.kind
        }

        fn invoke(&self, method: MethodCall) -> Result<MethodResult> {
            match method {
                MethodCall::RunSingle { spec } => Ok(MethodResult::Item(ItemSummary { spec, frames: 1 })),
                MethodCall::ProcessFrame { index, .. } => {
                    if index == 13 {
                        panic!("unlucky frame");
                    }
                    Err(Error::Execution("frames unsupported".to_string()))
                }
            }
        }

        fn remote_init(&self) -> Option<RemoteInit> {
            None
        }

        fn event_sink(&self) -> Arc<dyn RunnerHooks> {
            Arc::new(NoopHooks)
        }
    }

    fn call(id: RunnerId, kind: &str) -> LocalCall {
        LocalCall {
            runner_id: id,
            kind: kind.to_string(),
            method: MethodCall::RunSingle {
                spec: RunSpec::new("/in.mp4", "/out").unwrap(),
            },
        }
    }

    #[test]
    fn test_dispatch_to_registered_target() {
        let target: Arc<dyn DispatchTarget> = Arc::new(Echo { id: 9001, kind: "echo" });
        register(&target);
        assert!(is_registered(9001));

        let result = dispatch(call(9001, "echo")).unwrap();
        assert!(matches!(result, MethodResult::Item(ItemSummary { frames: 1, .. })));

        unregister(9001);
        assert!(!is_registered(9001));
    }

    #[test]
    fn test_unregistered_id_fails_loudly() {
        let err = dispatch(call(424242, "echo")).unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let target: Arc<dyn DispatchTarget> = Arc::new(Echo { id: 9002, kind: "echo" });
        register(&target);
        let err = dispatch(call(9002, "framepipe.Runner")).unwrap_err();
        assert!(matches!(err, Error::Dispatch(msg) if msg.contains("'echo'")));
        unregister(9002);
    }

    #[test]
    fn test_registration_is_thread_local() {
        let target: Arc<dyn DispatchTarget> = Arc::new(Echo { id: 9003, kind: "echo" });
        register(&target);
        let seen_elsewhere = std::thread::spawn(|| is_registered(9003)).join().unwrap();
        assert!(!seen_elsewhere);
        unregister(9003);
    }

    #[test]
    fn test_dropped_target_is_not_resolved() {
        let target: Arc<dyn DispatchTarget> = Arc::new(Echo { id: 9004, kind: "echo" });
        register(&target);
        drop(target);
        assert!(!is_registered(9004));
        assert!(matches!(dispatch(call(9004, "echo")), Err(Error::Dispatch(_))));
        unregister(9004);
    }

    #[test]
    fn test_panic_becomes_execution_error() {
        let target: Arc<dyn DispatchTarget> = Arc::new(Echo { id: 9005, kind: "echo" });
        register(&target);
        let frame_call = LocalCall {
            runner_id: 9005,
            kind: "echo".to_string(),
            method: MethodCall::ProcessFrame {
                spec: RunSpec::new("/in.mp4", "/out").unwrap(),
                index: 13,
                frame: Frame::encoded(vec![1]),
            },
        };
        let err = dispatch_catching(frame_call).unwrap_err();
        assert!(matches!(err, Error::Execution(msg) if msg.contains("unlucky frame")));
        unregister(9005);
    }
}
