//! Error types and handling for batch-resizer

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for batch-resizer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type.
///
/// Per-job failures never surface here: the runner folds them into a
/// [`JobResult`](crate::job::JobResult). These variants cover construction,
/// planning, configuration and scheduling.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors outside a job (benchmarks, fixtures)
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// A job or one of its specs violates an invariant
    #[error("Invalid job: {message}")]
    InvalidJob { message: String },

    /// The shared output directory could not be created
    #[error("Could not create output directory {path:?}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(String),

    /// `submit` was called while a batch is still in flight
    #[error("A batch is already running")]
    BatchInProgress,

    /// A worker task could not be joined
    #[error("Worker join error: {0}")]
    Join(String),
}

impl Error {
    /// Create a new invalid job error
    pub fn invalid_job<S: Into<String>>(message: S) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new output directory error
    pub fn output_directory(path: PathBuf, source: std::io::Error) -> Self {
        Self::OutputDirectory { path, source }
    }

    /// Whether this error aborts a whole batch rather than one job
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::OutputDirectory { .. } | Self::BatchInProgress | Self::Join(_) => true,

            Self::Io(_) | Self::Image(_) => false,

            Self::InvalidJob { .. } | Self::Config { .. } | Self::Serde(_) => true,
        }
    }

    /// Get the associated path if available
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::OutputDirectory { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Io(e) => format!("File system error: {}", e),
            Self::OutputDirectory { path, source } => {
                format!("Could not create output directory {}: {}", path.display(), source)
            }
            Self::BatchInProgress => {
                "A batch is already running. Cancel it or wait for it to finish.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serde(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serde(format!("YAML parsing error: {}", err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}
