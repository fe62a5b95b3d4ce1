use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::media::{Frame, FrameSequence, MediaKind, RunSpec, Source, is_hidden, is_image_path};
use crate::stages::MediaOpener;

use super::parse_params;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawParams {
    width: u32,
    height: u32,
    channels: u8,
}

impl Default for RawParams {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            channels: 3,
        }
    }
}

/// Opens sources without decoding them.
///
/// Video files are treated as headerless streams of fixed-size raw frames.
/// Stills are handed over as one encoded frame and image sequences as one
/// encoded frame per file. Capture devices are not supported.
pub struct RawFrameOpener {
    width: u32,
    height: u32,
    channels: u8,
}

impl RawFrameOpener {
    pub fn new(width: u32, height: u32, channels: u8) -> Result<Self> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(Error::Component(format!(
                "raw frame geometry {}x{}x{} is empty",
                width, height, channels
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
        })
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: RawParams = parse_params("raw", params)?;
        Self::new(params.width, params.height, params.channels)
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl MediaOpener for RawFrameOpener {
    fn open(&self, spec: &RunSpec, kind: MediaKind) -> Result<FrameSequence> {
        let path = match spec.source() {
            Source::Device(index) => {
                return Err(Error::Config(format!(
                    "capture device {} cannot be opened by the raw opener",
                    index
                )));
            }
            Source::Path(path) => PathBuf::from(path),
        };

        match kind {
            MediaKind::Video => {
                let file = File::open(&path)?;
                Ok(Box::new(RawVideo {
                    reader: BufReader::new(file),
                    path,
                    width: self.width,
                    height: self.height,
                    channels: self.channels,
                    done: false,
                }))
            }
            MediaKind::Image => {
                let bytes = fs::read(&path)?;
                Ok(Box::new(std::iter::once(Ok(Frame::encoded(bytes)))))
            }
            MediaKind::ImageSequence => {
                let files = sequence_files(&path)?;
                Ok(Box::new(files.into_iter().map(|file| -> Result<Frame> {
                    Ok(Frame::encoded(fs::read(file)?))
                })))
            }
            MediaKind::Stream => Err(Error::Config(format!(
                "{} is not a capture device",
                path.display()
            ))),
        }
    }
}

/// Visible image files of a sequence directory, in name order.
fn sequence_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_hidden(&path) && is_image_path(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

struct RawVideo {
    reader: BufReader<File>,
    path: PathBuf,
    width: u32,
    height: u32,
    channels: u8,
    done: bool,
}

impl Iterator for RawVideo {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let len = self.width as usize * self.height as usize * self.channels as usize;
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }

        if filled == 0 {
            self.done = true;
            return None;
        }
        if filled < len {
            self.done = true;
            return Some(Err(Error::Execution(format!(
                "{} ends with a partial frame ({} of {} bytes)",
                self.path.display(),
                filled,
                len
            ))));
        }
        Some(Frame::raw(self.width, self.height, self.channels, buffer))
    }
}
