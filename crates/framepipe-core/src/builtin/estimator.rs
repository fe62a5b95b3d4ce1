use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::media::{Frame, Landmarks};
use crate::stages::Estimator;

use super::parse_params;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyntheticParams {
    landmarks: usize,
    delay_ms: u64,
    fail_on: Vec<usize>,
    crash_on: Vec<usize>,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            landmarks: 8,
            delay_ms: 0,
            fail_on: Vec::new(),
            crash_on: Vec::new(),
        }
    }
}

/// Deterministic stand-in for a landmark model.
///
/// Landmarks are derived from a checksum of the frame bytes and the frame
/// index, so the same input always produces the same output. `delay_ms`
/// simulates model latency; `fail_on` lists frame indices that return an
/// error; `crash_on` lists frame indices that terminate the process, which
/// exercises the process pool's crash handling.
pub struct SyntheticEstimator {
    params: SyntheticParams,
    ready: OnceLock<()>,
}

impl SyntheticEstimator {
    pub fn new(landmarks: usize) -> Self {
        Self {
            params: SyntheticParams {
                landmarks,
                ..SyntheticParams::default()
            },
            ready: OnceLock::new(),
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: SyntheticParams = parse_params("synthetic", params)?;
        if params.landmarks == 0 {
            return Err(Error::Component(
                "synthetic estimator needs at least one landmark".to_string(),
            ));
        }
        Ok(Self {
            params,
            ready: OnceLock::new(),
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.params.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn failing_on(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.params.fail_on.extend(indices);
        self
    }

    fn checksum(frame: &Frame) -> u64 {
        frame
            .data
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64))
    }
}

impl Estimator for SyntheticEstimator {
    fn setup(&self) -> Result<()> {
        self.ready.get_or_init(|| {
            tracing::debug!(
                "Synthetic estimator ready ({} landmarks) in process {}",
                self.params.landmarks,
                std::process::id()
            );
        });
        Ok(())
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.params.landmarks]
    }

    fn headers(&self) -> Vec<String> {
        (0..self.params.landmarks).map(|i| format!("lm{}", i)).collect()
    }

    fn estimate(&self, frame: &Frame, index: usize) -> Result<Landmarks> {
        if self.params.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.params.delay_ms));
        }
        if self.params.crash_on.contains(&index) {
            tracing::error!("crash requested on frame {}", index);
            std::process::abort();
        }
        if self.params.fail_on.contains(&index) {
            return Err(Error::Execution(format!(
                "synthetic failure on frame {}",
                index
            )));
        }

        let seed = Self::checksum(frame).wrapping_add(index as u64 * 7919);
        Ok((0..self.params.landmarks)
            .map(|i| {
                let mixed = seed.wrapping_add(i as u64 * 104_729) % 1000;
                mixed as f32 / 1000.0
            })
            .collect())
    }

    fn annotate(&self, frame: &Frame, _index: usize, landmarks: &[f32]) -> Result<Frame> {
        let mut annotated = frame.clone();
        if frame.is_encoded() {
            return Ok(annotated);
        }

        // Mark each (x, y) landmark pair as a white pixel.
        let width = frame.width as usize;
        let height = frame.height as usize;
        let channels = frame.channels as usize;
        for pair in landmarks.chunks_exact(2) {
            let x = ((pair[0].clamp(0.0, 1.0) * (width - 1) as f32) as usize).min(width - 1);
            let y = ((pair[1].clamp(0.0, 1.0) * (height - 1) as f32) as usize).min(height - 1);
            let offset = (y * width + x) * channels;
            if let Some(pixel) = annotated.data.get_mut(offset..offset + channels) {
                pixel.fill(255);
            }
        }
        Ok(annotated)
    }
}
