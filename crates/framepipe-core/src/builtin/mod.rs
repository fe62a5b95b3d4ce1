//! Components shipped with framepipe.
//!
//! - `estimator` - deterministic synthetic analysis step
//! - `collector` - JSON and null collectors
//! - `opener` - raw-frame video, still and image-sequence opener
//! - `progress` - console progress renderable and the hooks that drive it

mod collector;
mod estimator;
mod opener;
mod progress;

pub use collector::{JsonCollector, NullCollector};
pub use estimator::SyntheticEstimator;
pub use opener::RawFrameOpener;
pub use progress::{ConsoleProgress, ProgressHooks};

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Decode component parameters; `null` means all defaults.
fn parse_params<T: DeserializeOwned + Default>(component: &str, params: &serde_json::Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| Error::Component(format!("invalid parameters for '{}': {}", component, e)))
}
