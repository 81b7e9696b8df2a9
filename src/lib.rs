//! batch-resizer - parallel batch image conversion
//!
//! Converts a set of images to one output format and size, in parallel, with
//! optional size-targeted compression.
//!
//! # Features
//!
//! - **Resize modes**: percentage, fit width, fit height, bounding box
//! - **Size targeting**: bounded quality search to fit a byte budget
//! - **Collision-free output names**: never overwrites inputs or earlier outputs
//! - **Parallel processing**: fixed worker pool with cooperative cancellation
//! - **Camera RAW input**: CR2, NEF, ARW, DNG and friends (`raw` feature)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use batch_resizer::{
//!     BatchPlanner, EncodeSpec, OutputFormat, OutputTarget, ResizeSpec, Scheduler,
//! };
//!
//! # async fn run() -> batch_resizer::Result<()> {
//! let planner = BatchPlanner::new(
//!     ResizeSpec::FitBoundingBox { width: 1920, height: 1080 },
//!     EncodeSpec::new(OutputFormat::WebP, 80)?.with_size_target(500 * 1024)?,
//!     OutputTarget::Directory("out".into()),
//! )?;
//! let jobs = planner.plan(["a.jpg", "b.png"])?;
//!
//! let scheduler = Scheduler::default();
//! let report = scheduler.submit(jobs)?.finish().await?;
//! println!("{}", report.status_line());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod job;
pub mod parallel;
pub mod paths;
pub mod planner;
pub mod processing;

// Re-export commonly used types
pub use config::Settings;
pub use error::{Error, Result};
pub use job::{EncodeSpec, Job, JobResult, JobStatus};
pub use parallel::{
    BatchHandle, BatchReport, BatchState, CancelToken, ProgressState, ProgressTracker, Scheduler,
};
pub use paths::PathResolver;
pub use planner::{discover_inputs, BatchPlanner, OutputTarget};
pub use processing::{JobRunner, OutputFormat, ResizeSpec};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a tracing subscriber driven by `RUST_LOG`, logging to stderr.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() -> Result<()> {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish(),
    )
    .is_ok()
    {
        info!("batch-resizer v{} initialized", VERSION);
    }

    log_capabilities();
    Ok(())
}

/// Install a tracing subscriber from settings
pub fn init_with_config(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_new(&settings.logging.level)
        .map_err(|e| Error::config(format!("Invalid log level: {}", e)))?;

    let installed = if settings.logging.json_format {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish(),
        )
    };

    if installed.is_ok() {
        info!("batch-resizer v{} initialized with custom config", VERSION);
    }

    log_capabilities();
    Ok(())
}

fn log_capabilities() {
    info!("Default worker count: {}", parallel::default_concurrency());
    info!(
        "Camera RAW decoding: {}",
        if cfg!(feature = "raw") { "enabled" } else { "disabled" }
    );
    info!(
        "Output formats: {}",
        OutputFormat::all()
            .iter()
            .filter(|f| f.is_encodable())
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_init() {
        // Should not fail on multiple calls
        let _ = init();
        let _ = init();
        let _ = init_with_config(&Settings::default());
    }

    #[test]
    fn test_init_rejects_bad_level() {
        let mut settings = Settings::default();
        settings.logging.level = "info,batch_resizer=notalevel".to_string();
        assert!(init_with_config(&settings).is_err());
    }
}
