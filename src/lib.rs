//! eij_convert - `.8ij` container to 8-bit raster transcoder
//!
//! Splits `.8ij` containers into their 12-bit JPEG frames, reduces each
//! frame to 8 bits under a selectable scaling policy and writes one PNG per
//! frame. Batches of containers are converted on a bounded worker pool with
//! per-file timeouts.

pub mod batch;
pub mod container;
pub mod depth;
pub mod error;
pub mod jpeg;
pub mod metrics;
pub mod pipeline;
pub mod writer;

pub use batch::{
    discover_jobs, run_batch, BatchConfig, BatchResult, InProcessRunner, JobRunner, JobStatus,
    SubprocessRunner,
};
pub use container::{FrameReader, FrameRecord};
pub use depth::{reduce, RasterBuffer, ScalingPolicy};
pub use error::{ContainerError, ConvertError, Result};
pub use jpeg::{JpegError, SampleBuffer};
pub use metrics::BatchSummary;
pub use pipeline::{convert_file, BatchJob, FileSummary, Termination};
pub use writer::{frame_file_name, write_frame, OutputFormat};
