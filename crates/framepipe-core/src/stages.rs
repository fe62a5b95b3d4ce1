//! Collaborator contracts consumed by the runner.
//!
//! The runner never looks inside frames or results; it only sequences calls
//! to these three traits.

use crate::error::Result;
use crate::media::{Frame, FrameSequence, Landmarks, MediaKind, ProcessResult, RunSpec};

/// Per-frame analysis step.
///
/// `estimate` and `annotate` may run concurrently on several threads.
pub trait Estimator: Send + Sync {
    /// Prepare models or buffers. Must be idempotent: it is called once by the
    /// runner before frame 0 and again by every worker that runs frame tasks.
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Shape of the landmark array for one frame.
    fn shape(&self) -> Vec<usize>;

    /// Column headers matching the flattened landmarks.
    fn headers(&self) -> Vec<String>;

    /// Compute landmarks for frame `index`.
    fn estimate(&self, frame: &Frame, index: usize) -> Result<Landmarks>;

    /// Draw `landmarks` onto a copy of `frame`.
    fn annotate(&self, frame: &Frame, index: usize, landmarks: &[f32]) -> Result<Frame>;
}

/// Persists or displays per-item results.
pub trait Collector: Send + Sync {
    /// Screen a candidate before it is scheduled. `false` skips the item.
    fn apply_exist_rule(&self, _spec: &RunSpec) -> bool {
        true
    }

    /// Receive every frame result of one item, in frame order.
    fn collect_results(&self, spec: &RunSpec, results: Vec<ProcessResult>) -> Result<()>;
}

/// Opens a classified source as a lazy frame sequence.
pub trait MediaOpener: Send + Sync {
    fn open(&self, spec: &RunSpec, kind: MediaKind) -> Result<FrameSequence>;
}
