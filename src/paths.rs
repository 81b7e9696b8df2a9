//! Collision-free output path resolution

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Highest numeric suffix tried before giving up on uniqueness
pub const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Picks an output path for each input that neither overwrites the input,
/// an existing file, nor another job's output in the same batch.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver {
    max_suffix: u32,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self {
            max_suffix: MAX_COLLISION_SUFFIX,
        }
    }
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower the suffix cap (mainly for tests)
    pub fn with_max_suffix(max_suffix: u32) -> Self {
        Self {
            max_suffix: max_suffix.max(1),
        }
    }

    /// Resolve the output path for `input` in `output_dir` with extension `ext`
    /// (including the leading dot).
    ///
    /// The caller records the returned path in `assigned` before resolving the
    /// next input. When every suffix up to the cap is taken, the last candidate
    /// is returned without a uniqueness guarantee.
    pub fn resolve(
        &self,
        input: &Path,
        output_dir: &Path,
        ext: &str,
        assigned: &HashSet<PathBuf>,
    ) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let mut candidate = output_dir.join(format!("{}{}", stem, ext));

        if is_same_file(&candidate, input) {
            candidate = output_dir.join(format!("{}_resized{}", stem, ext));
        }

        if !is_taken(&candidate, assigned) {
            return candidate;
        }

        for n in 1..=self.max_suffix {
            candidate = output_dir.join(format!("{}_{}{}", stem, n, ext));
            if !is_taken(&candidate, assigned) {
                debug!("Output for {:?} renamed to {:?}", input, candidate);
                return candidate;
            }
        }

        warn!(
            "No free output name for {:?} after {} attempts; using {:?}",
            input, self.max_suffix, candidate
        );
        candidate
    }
}

fn is_taken(candidate: &Path, assigned: &HashSet<PathBuf>) -> bool {
    assigned.contains(candidate) || candidate.exists()
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => absolute(a) == absolute(b),
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
