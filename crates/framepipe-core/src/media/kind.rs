//! Media classification.
//!
//! Files are classified by content first (image magic numbers) and by
//! extension second. A directory is an image sequence when every visible
//! entry in it is an image file.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

use super::spec::{RunSpec, Source};

/// Recognized still-image extensions (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

/// Recognized video extensions (lowercase). `raw`, `rgb` and `yuv` are
/// headerless raw-frame files.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "m4v", "mpg", "mpeg", "raw", "rgb", "yuv",
];

/// What kind of frame sequence a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    ImageSequence,
    Image,
    Stream,
}

impl MediaKind {
    /// Classify the source of a run-spec.
    ///
    /// Returns `Error::Config` for missing paths, empty or mixed directories
    /// and unrecognized files.
    pub fn classify(spec: &RunSpec) -> Result<Self> {
        let path = match spec.source() {
            Source::Device(_) => return Ok(MediaKind::Stream),
            Source::Path(path) => Path::new(path),
        };

        if path.is_dir() {
            if is_image_sequence_dir(path)? {
                return Ok(MediaKind::ImageSequence);
            }
            return Err(Error::Config(format!(
                "directory {} is not a uniform image sequence",
                path.display()
            )));
        }

        if !path.is_file() {
            return Err(Error::Config(format!(
                "unsupported source path {}: not a file or directory",
                path.display()
            )));
        }

        if sniff_image(path)? {
            return Ok(MediaKind::Image);
        }
        if is_video_path(path) {
            return Ok(MediaKind::Video);
        }
        if is_image_path(path) {
            return Ok(MediaKind::Image);
        }

        Err(Error::Config(format!(
            "unsupported file type: {}",
            path.display()
        )))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether the path has a still-image extension.
pub fn is_image_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether the path has a video extension.
pub fn is_video_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether a file or directory name starts with a dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Whether every visible entry of `dir` is an image file (and there is at least one).
pub fn is_image_sequence_dir(dir: &Path) -> Result<bool> {
    let mut images = 0usize;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() || !is_image_path(&path) {
            return Ok(false);
        }
        images += 1;
    }
    Ok(images > 0)
}

/// Check the leading bytes of a file for a known image signature.
fn sniff_image(path: &Path) -> Result<bool> {
    let mut header = [0u8; 12];
    let mut file = fs::File::open(path)?;
    let read = file.read(&mut header)?;
    let header = &header[..read];

    const SIGNATURES: &[&[u8]] = &[
        b"\x89PNG\r\n\x1a\n",
        b"\xff\xd8\xff",
        b"GIF87a",
        b"GIF89a",
        b"BM",
        b"II*\x00",
        b"MM\x00*",
    ];

    if SIGNATURES.iter().any(|sig| header.starts_with(sig)) {
        return Ok(true);
    }
    // RIFF....WEBP
    Ok(header.len() == 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WEBP")
}
