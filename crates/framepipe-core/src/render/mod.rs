//! Shared UI objects behind a single owner thread.
//!
//! A [`Renderable`] (for example the console progress display) holds mutable
//! state and often a terminal handle, so it is neither shared nor sent. The
//! [`ProxyManager`] owns every renderable on one dedicated thread; producers
//! on any thread talk to it through a [`ProxyClient`] by message passing and
//! address objects with a [`RenderableRef`].

mod proxy;
mod reference;
mod registry;

pub use proxy::{ClientId, ProxyClient, ProxyHandle, ProxyManager};
pub use reference::RenderableRef;
pub use registry::RenderRegistry;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// A method result that can be sent back to a client.
pub trait Encodable {
    fn encode(&self) -> Result<Value>;
}

impl<T: Serialize> Encodable for T {
    fn encode(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// An object living on the render thread.
///
/// Methods are invoked by name with JSON arguments; the return value is
/// encoded on the render thread before it crosses back to the caller.
pub trait Renderable: 'static {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Box<dyn Encodable>>;
}

/// Fetch argument `index` as `T`.
pub fn arg<T: serde::de::DeserializeOwned>(args: &[Value], index: usize, method: &str) -> Result<T> {
    let value = args.get(index).ok_or_else(|| {
        Error::Proxy(format!("{} expects at least {} arguments", method, index + 1))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| Error::Proxy(format!("{} argument {}: {}", method, index, e)))
}
