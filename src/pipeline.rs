//! Single-container conversion: read -> decode -> reduce -> write

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::container::FrameReader;
use crate::depth::{reduce, ScalingPolicy};
use crate::error::{ContainerError, ConvertError, Result};
use crate::jpeg;
use crate::writer::{ensure_dir, write_frame, OutputFormat};

/// One unit of batch work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub input_file: PathBuf,
    pub output_directory: PathBuf,
    pub scaling_policy: ScalingPolicy,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl BatchJob {
    pub fn new(
        input_file: impl Into<PathBuf>,
        output_directory: impl Into<PathBuf>,
        scaling_policy: ScalingPolicy,
    ) -> Self {
        Self {
            input_file: input_file.into(),
            output_directory: output_directory.into(),
            scaling_policy,
            output_format: OutputFormat::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// File name without the container extension
    pub fn stem(&self) -> String {
        self.input_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frames".to_string())
    }
}

/// How reading a container ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    EndOfStream,
    Corrupt(String),
    Incomplete(String),
    Io(String),
}

impl Termination {
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::EndOfStream)
    }
}

/// Per-file frame accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub input_file: PathBuf,
    /// Complete frame records read from the container
    pub frames_attempted: u64,
    pub frames_written: u64,
    pub decode_failures: u64,
    pub shape_failures: u64,
    pub write_failures: u64,
    pub termination: Termination,
}

impl FileSummary {
    fn new(input_file: &Path) -> Self {
        Self {
            input_file: input_file.to_path_buf(),
            frames_attempted: 0,
            frames_written: 0,
            decode_failures: 0,
            shape_failures: 0,
            write_failures: 0,
            termination: Termination::EndOfStream,
        }
    }

    pub fn frames_failed(&self) -> u64 {
        self.decode_failures + self.shape_failures + self.write_failures
    }

    /// Clean end of stream, and at least one frame written if any were read.
    pub fn is_success(&self) -> bool {
        self.termination.is_clean() && (self.frames_attempted == 0 || self.frames_written > 0)
    }

    /// Human-readable reason when the file did not succeed
    pub fn failure_detail(&self) -> Option<String> {
        match &self.termination {
            Termination::Corrupt(d) => Some(format!("corrupt stream: {}", d)),
            Termination::Incomplete(d) => Some(format!("incomplete frame: {}", d)),
            Termination::Io(d) => Some(format!("read error: {}", d)),
            Termination::EndOfStream if !self.is_success() => Some(format!(
                "no frame of {} could be converted",
                self.frames_attempted
            )),
            Termination::EndOfStream => None,
        }
    }
}

/// Convert every frame of one container.
///
/// Bad frames are counted and skipped. A corrupt or truncated record stops
/// the file; frames already written stay on disk. Returns `Err` only when
/// the input cannot be opened or the output directory cannot be created.
pub fn convert_file(job: &BatchJob) -> Result<FileSummary> {
    let reader = FrameReader::open(&job.input_file)?;
    ensure_dir(&job.output_directory)?;

    info!("Processing: {}", job.input_file.display());
    let stem = job.stem();
    let mut summary = FileSummary::new(&job.input_file);

    for record in reader {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("  {}: {}", job.input_file.display(), e);
                summary.termination = match e {
                    ContainerError::BadMagic { .. } => Termination::Corrupt(e.to_string()),
                    ContainerError::Incomplete { .. } => Termination::Incomplete(e.to_string()),
                    ContainerError::Io(_) => Termination::Io(e.to_string()),
                };
                break;
            }
        };

        if summary.frames_attempted % 10 == 0 {
            debug!(
                "  Processing frame {}: {} bytes",
                record.frame_index,
                record.payload.len()
            );
        }
        summary.frames_attempted += 1;

        let samples = match jpeg::decode(&record.payload) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("  Skipping frame {}: {}", record.frame_index, e);
                summary.decode_failures += 1;
                continue;
            }
        };
        let raster = reduce(&samples, job.scaling_policy);
        drop(samples);

        match write_frame(
            &raster,
            &job.output_directory,
            &stem,
            record.frame_index,
            job.output_format,
        ) {
            Ok(path) => {
                debug!("  Wrote {}", path.display());
                summary.frames_written += 1;
            }
            Err(ConvertError::UnexpectedShape { channels }) => {
                warn!(
                    "  Skipping frame {}: unexpected image shape {:?}",
                    record.frame_index,
                    (raster.height(), raster.width(), channels)
                );
                summary.shape_failures += 1;
            }
            Err(e) => {
                warn!("  Failed to write frame {}: {}", record.frame_index, e);
                summary.write_failures += 1;
            }
        }
    }

    if summary.is_success() {
        info!(
            "  ✓ Extracted {} frames to {}",
            summary.frames_written,
            job.output_directory.display()
        );
    } else {
        warn!(
            "  ✗ {} stopped after {} of {} frames",
            job.input_file.display(),
            summary.frames_written,
            summary.frames_attempted
        );
    }
    Ok(summary)
}
