//! Core image processing functionality

use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, warn};

use crate::job::{EncodeSpec, Job, JobResult, JobStatus};
use crate::parallel::CancelToken;

pub mod encode;
pub mod formats;
pub mod loader;
pub mod raw;
pub mod resize;

pub use encode::{encode, encode_to_target, EncodeError, TargetEncoding};
pub use formats::*;
pub use loader::{load_image, LoadError, LoadedImage};
pub use resize::{FilterType, ImageResizer, ResizeSpec};

/// Encoded output ready to be written
struct EncodedOutput {
    bytes: Vec<u8>,
    quality: Option<u8>,
    note: Option<String>,
}

/// Executes a single job: load, resize, encode, write.
///
/// Never returns an error. Every failure is folded into the [`JobResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JobRunner {
    resizer: ImageResizer,
}

impl JobRunner {
    /// Create a runner with the default smooth filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner with a custom resize filter
    pub fn with_filter(filter: FilterType) -> Self {
        Self {
            resizer: ImageResizer::with_filter(filter),
        }
    }

    /// Run one job to completion
    pub fn run(&self, job: &Job, cancel: &CancelToken) -> JobResult {
        if cancel.is_cancelled() {
            debug!("Job {} cancelled before start", job.id());
            return JobResult::cancelled(job);
        }

        let start_time = Instant::now();
        debug!("Processing job {}: {:?} -> {:?}", job.id(), job.input_path(), job.output_path());

        let loaded = match load_image(job.input_path()) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Job {} failed to load: {}", job.id(), e);
                let mut result = JobResult::failed_to_load(job, e.to_string());
                result.elapsed = start_time.elapsed();
                return result;
            }
        };

        let original_dims = (loaded.image.width(), loaded.image.height());
        let resized = self.resizer.resize(&loaded.image, job.resize());
        drop(loaded.image);
        let new_dims = (resized.width(), resized.height());

        let output = match encode_for(&resized, job.encode()) {
            Ok(output) => output,
            Err(e) => {
                warn!("Job {} failed to encode: {}", job.id(), e);
                let mut result = JobResult::failed_to_save(job, e.to_string());
                result.original_bytes = loaded.file_size;
                result.original_dims = original_dims;
                result.elapsed = start_time.elapsed();
                return result;
            }
        };

        if let Err(e) = std::fs::write(job.output_path(), &output.bytes) {
            warn!("Job {} failed to write {:?}: {}", job.id(), job.output_path(), e);
            let message = format!("Could not write {}: {}", job.output_path().display(), e);
            let mut result = JobResult::failed_to_save(job, message);
            result.original_bytes = loaded.file_size;
            result.original_dims = original_dims;
            result.elapsed = start_time.elapsed();
            return result;
        }

        let elapsed = start_time.elapsed();
        debug!(
            "Job {} done: {}x{} -> {}x{}, {} -> {} bytes in {:.2}s",
            job.id(),
            original_dims.0,
            original_dims.1,
            new_dims.0,
            new_dims.1,
            loaded.file_size,
            output.bytes.len(),
            elapsed.as_secs_f64()
        );

        JobResult {
            job_id: job.id(),
            input_path: job.input_path().to_path_buf(),
            output_path: job.output_path().to_path_buf(),
            original_bytes: loaded.file_size,
            new_bytes: output.bytes.len() as u64,
            original_dims,
            new_dims,
            status: JobStatus::Success,
            message: output.note,
            quality: output.quality,
            elapsed,
        }
    }
}

fn encode_for(image: &DynamicImage, spec: &EncodeSpec) -> Result<EncodedOutput, EncodeError> {
    let format = spec.format();

    match spec.size_target() {
        Some(max_bytes) if format.is_lossy() => {
            let target = encode_to_target(image, format, max_bytes)?;
            let note = (!target.met_target).then(|| {
                format!(
                    "Target of {} KB not reached; saved at quality {} ({} KB)",
                    max_bytes / 1024,
                    target.quality,
                    target.bytes.len() / 1024
                )
            });
            Ok(EncodedOutput {
                quality: Some(target.quality),
                bytes: target.bytes,
                note,
            })
        }
        _ => {
            let bytes = encode(image, format, spec.quality())?;
            Ok(EncodedOutput {
                bytes,
                quality: format.is_lossy().then_some(spec.quality()),
                note: None,
            })
        }
    }
}
