//! Units of work and their outcomes

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::processing::{OutputFormat, ResizeSpec};

/// Output encoding parameters.
///
/// Only constructible through [`EncodeSpec::new`] and
/// [`EncodeSpec::with_size_target`], so a PNG spec never carries a size target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodeSpec {
    format: OutputFormat,
    quality: u8,
    size_target: Option<u64>,
}

impl EncodeSpec {
    /// Fixed-quality encoding. Quality must be in `1..=100`.
    pub fn new(format: OutputFormat, quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(Error::invalid_job(format!(
                "Quality must be between 1 and 100, got {}",
                quality
            )));
        }

        Ok(Self {
            format,
            quality,
            size_target: None,
        })
    }

    /// Ask for the highest quality whose output fits `max_bytes`
    pub fn with_size_target(mut self, max_bytes: u64) -> Result<Self> {
        if !self.format.is_lossy() {
            return Err(Error::invalid_job(format!(
                "{} is lossless and cannot be compressed to a target size",
                self.format
            )));
        }
        if max_bytes == 0 {
            return Err(Error::invalid_job("Target size must be greater than 0"));
        }

        self.size_target = Some(max_bytes);
        Ok(self)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Quality used when no size target is set
    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn size_target(&self) -> Option<u64> {
        self.size_target
    }
}

/// One input file to convert. Immutable once built.
#[derive(Debug, Clone)]
pub struct Job {
    id: u64,
    input_path: PathBuf,
    output_path: PathBuf,
    resize: ResizeSpec,
    encode: EncodeSpec,
}

impl Job {
    /// Build a job with an already-resolved output path
    pub fn new(
        id: u64,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        resize: ResizeSpec,
        encode: EncodeSpec,
    ) -> Result<Self> {
        resize.validate()?;

        Ok(Self {
            id,
            input_path: input_path.into(),
            output_path: output_path.into(),
            resize,
            encode,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn resize(&self) -> &ResizeSpec {
        &self.resize
    }

    pub fn encode(&self) -> &EncodeSpec {
        &self.encode
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    FailedToLoad,
    FailedToSave,
    Cancelled,
}

impl JobStatus {
    /// Short label for tables and progress output
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "Done",
            Self::FailedToLoad => "Failed to load",
            Self::FailedToSave => "Failed to save",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::FailedToLoad | Self::FailedToSave)
    }
}

/// Outcome of exactly one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: u64,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub original_bytes: u64,
    pub new_bytes: u64,
    pub original_dims: (u32, u32),
    pub new_dims: (u32, u32),
    pub status: JobStatus,
    /// Human-readable detail; on success, a residual note such as a missed size target
    pub message: Option<String>,
    /// Quality the output was encoded at, when the format has one
    pub quality: Option<u8>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl JobResult {
    fn empty(job: &Job, status: JobStatus, message: Option<String>) -> Self {
        Self {
            job_id: job.id(),
            input_path: job.input_path().to_path_buf(),
            output_path: job.output_path().to_path_buf(),
            original_bytes: 0,
            new_bytes: 0,
            original_dims: (0, 0),
            new_dims: (0, 0),
            status,
            message,
            quality: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Result for a job that never ran
    pub fn cancelled(job: &Job) -> Self {
        Self::empty(job, JobStatus::Cancelled, Some("Cancelled".to_string()))
    }

    /// Result for a job whose input could not be read or decoded
    pub fn failed_to_load(job: &Job, message: impl Into<String>) -> Self {
        Self::empty(job, JobStatus::FailedToLoad, Some(message.into()))
    }

    /// Result for a job whose output could not be encoded or written
    pub fn failed_to_save(job: &Job, message: impl Into<String>) -> Self {
        Self::empty(job, JobStatus::FailedToSave, Some(message.into()))
    }

    /// Size change as a percentage of the original; 0 when the original size is unknown
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.new_bytes as f64 / self.original_bytes as f64) * 100.0
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Succeeded, but with something the user should know about
    pub fn has_warning(&self) -> bool {
        self.is_success() && self.message.is_some()
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
