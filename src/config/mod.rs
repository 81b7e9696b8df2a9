//! Configuration management for batch-resizer
//!
//! Settings are read by the command-line front end only. The engine takes
//! fully built jobs and never looks at configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::job::EncodeSpec;
use crate::parallel::default_concurrency;
use crate::planner::OutputTarget;
use crate::processing::{OutputFormat, ResizeSpec};

/// Target size offered when size targeting is switched on without a value
pub const DEFAULT_TARGET_SIZE_KB: u64 = 500;

/// Persisted batch preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shared output directory (None = a `resized/` folder next to each input)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Output format
    pub format: OutputFormat,

    /// Encoder quality (1-100) when no size target is set
    pub quality: u8,

    /// Size target in kilobytes for lossy formats
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_size_kb: Option<u64>,

    /// Number of worker threads (None = auto-detect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    /// Expand directories recursively
    pub recursive: bool,

    /// Resize applied to every image
    pub resize: ResizeSpec,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: None,
            format: OutputFormat::Jpeg,
            quality: 85,
            target_size_kb: None,
            threads: None,
            recursive: false,
            resize: ResizeSpec::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string)
    pub level: String,

    /// Enable JSON logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FileFormat {
    Toml,
    Yaml,
}

fn file_format(path: &Path) -> Result<FileFormat> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "toml" => Ok(FileFormat::Toml),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        _ => Err(Error::config(
            "Unsupported config file format. Use .toml or .yaml",
        )),
    }
}

impl Settings {
    /// Load settings from a `.toml` or `.yaml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = file_format(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let settings: Self = match format {
            FileFormat::Toml => toml::from_str(&content)?,
            FileFormat::Yaml => serde_yaml::from_str(&content)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a `.toml` or `.yaml` file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        let content = match file_format(path)? {
            FileFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| Error::config(format!("TOML serialization failed: {}", e)))?,
            FileFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| Error::config(format!("YAML serialization failed: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            Error::config(format!("Failed to write config file {:?}: {}", path, e))
        })?;

        Ok(())
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(Error::config(format!(
                "Quality must be between 1 and 100, got {}",
                self.quality
            )));
        }

        if self.target_size_kb == Some(0) {
            return Err(Error::config("Target size must be greater than 0 KB"));
        }

        if self.threads == Some(0) {
            return Err(Error::config("Thread count must be greater than 0"));
        }

        self.resize
            .validate()
            .map_err(|e| Error::config(format!("Invalid resize settings: {}", e)))?;

        tracing_subscriber::EnvFilter::try_new(&self.logging.level).map_err(|e| {
            Error::config(format!("Invalid log level '{}': {}", self.logging.level, e))
        })?;

        Ok(())
    }

    /// Encoding parameters for a batch.
    ///
    /// A size target on a lossless format is dropped with a warning.
    pub fn encode_spec(&self) -> Result<EncodeSpec> {
        let spec = EncodeSpec::new(self.format, self.quality)?;

        match self.target_size_kb {
            Some(kb) if self.format.is_lossy() => spec.with_size_target(kb.saturating_mul(1024)),
            Some(_) => {
                warn!("{} is lossless; ignoring the target size", self.format);
                Ok(spec)
            }
            None => Ok(spec),
        }
    }

    /// Where outputs go
    pub fn output_target(&self) -> OutputTarget {
        match &self.output_dir {
            Some(dir) => OutputTarget::Directory(dir.clone()),
            None => OutputTarget::BesideInputs,
        }
    }

    /// Worker count for the scheduler
    pub fn concurrency(&self) -> usize {
        self.threads.unwrap_or_else(default_concurrency).max(1)
    }
}
