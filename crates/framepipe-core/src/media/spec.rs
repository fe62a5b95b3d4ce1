//! Run specifications.

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Where frames come from.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum Source {
    /// A file or directory on disk (UTF-8 path).
    Path(String),
    /// A live capture device index.
    Device(i32),
}

/// Immutable source/destination pair identifying one unit of work.
///
/// Paths are stored as UTF-8 strings so a `RunSpec` can travel to worker
/// processes unchanged.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct RunSpec {
    source: Source,
    destination: String,
}

fn utf8_path(path: &Path, what: &str) -> Result<String> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::Config(format!("{} path is not valid UTF-8: {}", what, path.display())))?;
    if text.is_empty() {
        return Err(Error::Config(format!("{} path is empty", what)));
    }
    Ok(text.to_string())
}

impl RunSpec {
    /// Create a run-spec for a path source.
    pub fn new(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            source: Source::Path(utf8_path(source.as_ref(), "source")?),
            destination: utf8_path(destination.as_ref(), "destination")?,
        })
    }

    /// Create a run-spec for a capture device.
    pub fn device(index: i32, destination: impl AsRef<Path>) -> Result<Self> {
        if index < 0 {
            return Err(Error::Config(format!("invalid device index {}", index)));
        }
        Ok(Self {
            source: Source::Device(index),
            destination: utf8_path(destination.as_ref(), "destination")?,
        })
    }

    /// Parse a CLI-style source: an all-digit string is a device index.
    pub fn parse(source: &str, destination: impl AsRef<Path>) -> Result<Self> {
        if !source.is_empty() && source.bytes().all(|b| b.is_ascii_digit()) {
            let index = source
                .parse::<i32>()
                .map_err(|e| Error::Config(format!("invalid device index '{}': {}", source, e)))?;
            return Self::device(index, destination);
        }
        Self::new(source, destination)
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The source path, or `None` for device sources.
    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            Source::Path(path) => Some(Path::new(path)),
            Source::Device(_) => None,
        }
    }

    pub fn destination(&self) -> &Path {
        Path::new(&self.destination)
    }

    /// Whether the source is an existing directory.
    pub fn is_directory(&self) -> bool {
        self.source_path().is_some_and(|p| p.is_dir())
    }
}

impl fmt::Display for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Path(path) => write!(f, "{} -> {}", path, self.destination),
            Source::Device(index) => write!(f, "device:{} -> {}", index, self.destination),
        }
    }
}
