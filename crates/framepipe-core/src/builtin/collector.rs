use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::{ProcessResult, RunSpec};
use crate::stages::Collector;

use super::parse_params;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct JsonParams {
    overwrite: bool,
}

/// Writes one `<destination>.json` document per item.
pub struct JsonCollector {
    overwrite: bool,
}

#[derive(Serialize)]
struct Document<'a> {
    source: String,
    headers: &'a [String],
    frames: Vec<Row<'a>>,
}

#[derive(Serialize)]
struct Row<'a> {
    frame_id: usize,
    landmarks: &'a [f32],
}

impl JsonCollector {
    pub fn new(overwrite: bool) -> Self {
        Self { overwrite }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: JsonParams = parse_params("json", params)?;
        Ok(Self::new(params.overwrite))
    }

    /// Where the results of `spec` are written.
    pub fn output_path(spec: &RunSpec) -> PathBuf {
        let mut path = spec.destination().as_os_str().to_owned();
        path.push(".json");
        PathBuf::from(path)
    }
}

impl Collector for JsonCollector {
    fn apply_exist_rule(&self, spec: &RunSpec) -> bool {
        if self.overwrite {
            return true;
        }
        let output = Self::output_path(spec);
        if output.exists() {
            tracing::info!("Skipping {}: {} exists", spec, output.display());
            return false;
        }
        true
    }

    fn collect_results(&self, spec: &RunSpec, results: Vec<ProcessResult>) -> Result<()> {
        let output = Self::output_path(spec);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let headers: &[String] = results.first().map(|r| r.headers.as_slice()).unwrap_or(&[]);
        let document = Document {
            source: match spec.source_path() {
                Some(path) => path.display().to_string(),
                None => spec.to_string(),
            },
            headers,
            frames: results
                .iter()
                .map(|r| Row {
                    frame_id: r.frame_id,
                    landmarks: &r.landmarks,
                })
                .collect(),
        };

        let mut writer = BufWriter::new(File::create(&output)?);
        serde_json::to_writer_pretty(&mut writer, &document)
            .map_err(|e| Error::Serialization(format!("{}: {}", output.display(), e)))?;
        writer.flush()?;

        tracing::debug!("Wrote {} frames to {}", results.len(), output.display());
        Ok(())
    }
}

/// Discards every result.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCollector;

impl Collector for NullCollector {
    fn collect_results(&self, _spec: &RunSpec, _results: Vec<ProcessResult>) -> Result<()> {
        Ok(())
    }
}
