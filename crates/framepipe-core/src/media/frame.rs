//! Frames and per-frame results.

use crate::error::{Error, Result};

use super::spec::RunSpec;

/// Flat landmark vector produced by an estimator for one frame.
pub type Landmarks = Vec<f32>;

/// A lazily decoded sequence of frames.
pub type FrameSequence = Box<dyn Iterator<Item = Result<Frame>> + Send>;

/// A single frame.
///
/// Raw frames carry `width * height * channels` bytes of interleaved pixels.
/// Encoded frames (stills handed over without decoding) have zero dimensions
/// and carry the file bytes.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a raw frame, validating the buffer length.
    pub fn raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if expected == 0 || data.len() != expected {
            return Err(Error::Execution(format!(
                "raw frame {}x{}x{} expects {} bytes, got {}",
                width,
                height,
                channels,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Wrap undecoded image bytes.
    pub fn encoded(data: Vec<u8>) -> Self {
        Self {
            width: 0,
            height: 0,
            channels: 0,
            data,
        }
    }

    pub fn is_encoded(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Output of the analysis step for one frame.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ProcessResult {
    pub frame_id: usize,
    pub headers: Vec<String>,
    pub landmarks: Landmarks,
    pub annotated_frame: Option<Frame>,
}

/// Result of one batch task.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ItemSummary {
    pub spec: RunSpec,
    /// Number of frame results handed to the collector.
    pub frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_length_checked() {
        assert!(Frame::raw(2, 2, 3, vec![0; 12]).is_ok());
        assert!(Frame::raw(2, 2, 3, vec![0; 11]).is_err());
        assert!(Frame::raw(0, 2, 3, vec![]).is_err());
    }

    #[test]
    fn test_encoded_frame() {
        let frame = Frame::encoded(vec![0x89, b'P', b'N', b'G']);
        assert!(frame.is_encoded());
        assert_eq!(frame.data.len(), 4);

        let raw = Frame::raw(1, 1, 1, vec![7]).unwrap();
        assert!(!raw.is_encoded());
    }
}
