//! Media inputs and per-frame data.
//!
//! - `spec` - `RunSpec`, the immutable source/destination pair for one unit of work
//! - `kind` - classification of a source into video, image sequence, still or stream
//! - `frame` - decoded frames and per-frame analysis results

mod frame;
mod kind;
mod spec;

pub use frame::{Frame, FrameSequence, ItemSummary, Landmarks, ProcessResult};
pub use kind::{
    IMAGE_EXTENSIONS, MediaKind, VIDEO_EXTENSIONS, is_hidden, is_image_path, is_image_sequence_dir,
    is_video_path,
};
pub use spec::{RunSpec, Source};
