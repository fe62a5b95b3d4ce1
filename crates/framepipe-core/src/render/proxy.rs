//! Render proxy: one owner thread, many producer clients.
//!
//! All clients share one request queue. Each client registers a private
//! response queue, and every request carries the client id so the reply is
//! routed back to the right producer. Requests from one client are handled
//! in the order they were sent.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::execute::panic_message;

use super::Renderable;
use super::reference::RenderableRef;
use super::registry::RenderRegistry;

pub type ClientId = u64;

type Factory = Box<dyn FnOnce() -> Box<dyn Renderable> + Send>;

enum Item {
    Register(Sender<Response>),
    Init(Factory),
    Method {
        owner: u32,
        target: u64,
        method: String,
        args: Vec<Value>,
    },
    Release {
        owner: u32,
        target: u64,
    },
    Disconnect,
    Shutdown,
}

struct Request {
    client_id: ClientId,
    item: Item,
}

/// Why the render thread refused a request.
#[derive(Debug, Clone, PartialEq)]
enum Fault {
    Foreign { owner: u32, current: u32 },
    Unknown(u64),
    Failed(String),
}

impl From<Error> for Fault {
    fn from(error: Error) -> Self {
        match error {
            Error::ForeignReference { owner, current } => Fault::Foreign { owner, current },
            Error::UnknownRenderable(id) => Fault::Unknown(id),
            other => Fault::Failed(other.to_string()),
        }
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Foreign { owner, current } => Error::ForeignReference { owner, current },
            Fault::Unknown(id) => Error::UnknownRenderable(id),
            Fault::Failed(message) => Error::Proxy(message),
        }
    }
}

struct Response {
    owner: u32,
    object: Option<u64>,
    outcome: std::result::Result<Value, Fault>,
}

static NEXT_MANAGER: AtomicU64 = AtomicU64::new(1);

/// Owns the render thread.
pub struct ProxyManager {
    handle: ProxyHandle,
    thread: Option<JoinHandle<()>>,
}

impl ProxyManager {
    /// Spawn the render thread.
    pub fn start() -> Result<Self> {
        let (requests, inbox) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("framepipe-render".to_string())
            .spawn(move || serve(inbox))?;

        Ok(Self {
            handle: ProxyHandle {
                manager: NEXT_MANAGER.fetch_add(1, Ordering::Relaxed),
                requests,
                next_client: Arc::new(AtomicU64::new(1)),
            },
            thread: Some(thread),
        })
    }

    /// A cloneable handle producers use to reach this manager.
    pub fn handle(&self) -> ProxyHandle {
        self.handle.clone()
    }

    /// Register a new client with its own response queue.
    pub fn client(&self) -> Result<ProxyClient> {
        self.handle.client()
    }

    /// Stop the render thread and drop every renderable it owns.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.requests.send(Request {
            client_id: 0,
            item: Item::Shutdown,
        });
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("render thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ProxyManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(inbox: Receiver<Request>) {
    let mut registry = RenderRegistry::new();
    let mut clients: FxHashMap<ClientId, Sender<Response>> = FxHashMap::default();
    let owner = registry.owner();

    for Request { client_id, item } in inbox {
        let response = match item {
            Item::Register(outbox) => {
                clients.insert(client_id, outbox);
                continue;
            }
            Item::Disconnect => {
                clients.remove(&client_id);
                continue;
            }
            Item::Shutdown => break,
            Item::Init(factory) => match panic::catch_unwind(AssertUnwindSafe(factory)) {
                Ok(object) => Response {
                    owner,
                    object: Some(registry.insert_boxed(object)),
                    outcome: Ok(Value::Null),
                },
                Err(payload) => Response {
                    owner,
                    object: None,
                    outcome: Err(Fault::Failed(format!(
                        "renderable factory panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                },
            },
            Item::Method {
                owner: ref_owner,
                target,
                method,
                args,
            } => Response {
                owner,
                object: Some(target),
                outcome: invoke(&mut registry, ref_owner, target, &method, &args),
            },
            Item::Release {
                owner: ref_owner,
                target,
            } => Response {
                owner,
                object: Some(target),
                outcome: registry
                    .release(ref_owner, target)
                    .map(|()| Value::Null)
                    .map_err(Fault::from),
            },
        };

        match clients.get(&client_id) {
            Some(outbox) => {
                if outbox.send(response).is_err() {
                    clients.remove(&client_id);
                }
            }
            None => tracing::debug!("dropping reply for unregistered client {}", client_id),
        }
    }

    tracing::debug!("render thread exiting with {} live objects", registry.len());
}

fn invoke(
    registry: &mut RenderRegistry,
    owner: u32,
    target: u64,
    method: &str,
    args: &[Value],
) -> std::result::Result<Value, Fault> {
    let object = registry.resolve(owner, target)?;
    match panic::catch_unwind(AssertUnwindSafe(|| object.call(method, args))) {
        Ok(Ok(encodable)) => encodable.encode().map_err(|e| {
            Fault::Failed(format!("result of {} could not be encoded: {}", method, e))
        }),
        Ok(Err(e)) => Err(Fault::from(e)),
        Err(payload) => Err(Fault::Failed(format!(
            "{} panicked: {}",
            method,
            panic_message(payload.as_ref())
        ))),
    }
}

/// Cloneable, `Send` route to a manager.
#[derive(Clone)]
pub struct ProxyHandle {
    manager: u64,
    requests: Sender<Request>,
    next_client: Arc<AtomicU64>,
}

thread_local! {
    static THREAD_CLIENTS: RefCell<FxHashMap<u64, ProxyClient>> = RefCell::new(FxHashMap::default());
}

impl ProxyHandle {
    /// Register a new client.
    pub fn client(&self) -> Result<ProxyClient> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (outbox, responses) = crossbeam_channel::unbounded();
        self.requests
            .send(Request {
                client_id: id,
                item: Item::Register(outbox),
            })
            .map_err(|_| gone())?;
        Ok(ProxyClient {
            id,
            requests: self.requests.clone(),
            responses,
        })
    }

    /// Run `f` with this thread's client, registering it on first use.
    pub fn with_client<R>(&self, f: impl FnOnce(&ProxyClient) -> Result<R>) -> Result<R> {
        THREAD_CLIENTS.with(|clients| {
            let mut clients = clients.borrow_mut();
            let client = match clients.entry(self.manager) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => entry.insert(self.client()?),
            };
            f(client)
        })
    }
}

fn gone() -> Error {
    Error::Proxy("render thread is not running".to_string())
}

/// A producer's connection to the render thread.
pub struct ProxyClient {
    id: ClientId,
    requests: Sender<Request>,
    responses: Receiver<Response>,
}

impl ProxyClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    fn round_trip(&self, item: Item) -> Result<Response> {
        self.requests
            .send(Request {
                client_id: self.id,
                item,
            })
            .map_err(|_| gone())?;
        self.responses.recv().map_err(|_| gone())
    }

    /// Build a renderable on the render thread and return a reference to it.
    ///
    /// The factory runs on the render thread, so the object itself never
    /// needs to be `Send`.
    pub fn initialize<T, F>(&self, factory: F) -> Result<RenderableRef<T>>
    where
        T: Renderable,
        F: FnOnce() -> T + Send + 'static,
    {
        let response = self.round_trip(Item::Init(Box::new(move || {
            Box::new(factory()) as Box<dyn Renderable>
        })))?;
        response.outcome?;
        let id = response
            .object
            .ok_or_else(|| Error::Proxy("render thread returned no object id".to_string()))?;
        Ok(RenderableRef::new(response.owner, id))
    }

    /// Invoke `method` on the referenced object and return its encoded result.
    pub fn call_method<T>(&self, target: &RenderableRef<T>, method: &str, args: Vec<Value>) -> Result<Value> {
        let response = self.round_trip(Item::Method {
            owner: target.owner(),
            target: target.id(),
            method: method.to_string(),
            args,
        })?;
        Ok(response.outcome?)
    }

    /// Remove the referenced object from the registry.
    pub fn release<T>(&self, target: RenderableRef<T>) -> Result<()> {
        let response = self.round_trip(Item::Release {
            owner: target.owner(),
            target: target.id(),
        })?;
        response.outcome?;
        Ok(())
    }
}

impl Drop for ProxyClient {
    fn drop(&mut self) {
        let _ = self.requests.send(Request {
            client_id: self.id,
            item: Item::Disconnect,
        });
    }
}
