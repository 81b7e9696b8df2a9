//! Turning a list of inputs into an ordered batch of jobs

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::job::{EncodeSpec, Job};
use crate::paths::PathResolver;
use crate::processing::{is_supported_input, ResizeSpec};

/// Name of the per-input output folder used by [`OutputTarget::BesideInputs`]
pub const RESIZED_SUBDIR: &str = "resized";

/// Where a batch writes its outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// One shared directory for every output
    Directory(PathBuf),
    /// A `resized/` folder next to each input
    BesideInputs,
}

impl OutputTarget {
    fn dir_for(&self, input: &Path) -> PathBuf {
        match self {
            Self::Directory(dir) => dir.clone(),
            Self::BesideInputs => input
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(RESIZED_SUBDIR),
        }
    }
}

/// Builds jobs with resolved, collision-free output paths
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    resize: ResizeSpec,
    encode: EncodeSpec,
    target: OutputTarget,
    resolver: PathResolver,
}

impl BatchPlanner {
    pub fn new(resize: ResizeSpec, encode: EncodeSpec, target: OutputTarget) -> Result<Self> {
        resize.validate()?;

        Ok(Self {
            resize,
            encode,
            target,
            resolver: PathResolver::new(),
        })
    }

    /// Use a custom path resolver
    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Create output directories and build one job per distinct input, in order.
    ///
    /// Fails only when an output directory cannot be created; no job is
    /// returned in that case.
    pub fn plan<I, P>(&self, inputs: I) -> Result<Vec<Job>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut seen_inputs = HashSet::new();
        let mut created_dirs = HashSet::new();
        let mut assigned = HashSet::new();
        let mut jobs = Vec::new();
        let ext = self.encode.format().extension();

        for input in inputs {
            let input = input.as_ref();
            let key = input.canonicalize().unwrap_or_else(|_| input.to_path_buf());
            if !seen_inputs.insert(key) {
                debug!("Skipping duplicate input {:?}", input);
                continue;
            }

            let output_dir = self.target.dir_for(input);
            if created_dirs.insert(output_dir.clone()) {
                std::fs::create_dir_all(&output_dir)
                    .map_err(|e| Error::output_directory(output_dir.clone(), e))?;
            }

            let output_path = self.resolver.resolve(input, &output_dir, ext, &assigned);
            assigned.insert(output_path.clone());

            let id = jobs.len() as u64;
            jobs.push(Job::new(id, input, output_path, self.resize, self.encode)?);
        }

        info!(
            "Planned {} job(s) into {} output folder(s)",
            jobs.len(),
            created_dirs.len()
        );
        Ok(jobs)
    }
}

/// Expand files and directories into a list of supported inputs.
///
/// Files named explicitly are kept in argument order; directory contents are
/// sorted. Paths that do not exist are skipped with a warning.
pub fn discover_inputs<P: AsRef<Path>>(paths: &[P], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        let path = path.as_ref();

        if path.is_file() {
            if is_supported_input(path) {
                files.push(path.to_path_buf());
            } else {
                warn!("Skipping unsupported file {:?}", path);
            }
        } else if path.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .max_depth(max_depth)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Could not read directory entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| is_supported_input(p))
                .collect();
            found.sort();
            debug!("Found {} input(s) in {:?}", found.len(), path);
            files.extend(found);
        } else {
            warn!("Input path does not exist: {:?}", path);
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::OutputFormat;
    use tempfile::TempDir;

    fn planner(target: OutputTarget) -> BatchPlanner {
        BatchPlanner::new(
            ResizeSpec::Percentage { percent: 50 },
            EncodeSpec::new(OutputFormat::WebP, 80).unwrap(),
            target,
        )
        .unwrap()
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_plan_shared_directory() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("out");
        let inputs = [root.path().join("a/img.png"), root.path().join("b/img.jpg")];

        let jobs = planner(OutputTarget::Directory(out.clone())).plan(&inputs).unwrap();

        assert!(out.is_dir());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id(), 0);
        assert_eq!(jobs[1].id(), 1);
        assert_eq!(jobs[0].output_path(), out.join("img.webp"));
        assert_eq!(jobs[1].output_path(), out.join("img_1.webp"));
    }

    #[test]
    fn test_plan_beside_inputs() {
        let root = TempDir::new().unwrap();
        let inputs = [root.path().join("a/one.png"), root.path().join("b/two.png")];
        for input in &inputs {
            touch(input);
        }

        let jobs = planner(OutputTarget::BesideInputs).plan(&inputs).unwrap();
        assert_eq!(jobs[0].output_path(), root.path().join("a/resized/one.webp"));
        assert_eq!(jobs[1].output_path(), root.path().join("b/resized/two.webp"));
        assert!(root.path().join("a/resized").is_dir());
    }

    #[test]
    fn test_plan_deduplicates_inputs() {
        let root = TempDir::new().unwrap();
        let input = root.path().join("same.png");
        let jobs = planner(OutputTarget::Directory(root.path().join("out")))
            .plan([&input, &input, &input])
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn test_plan_deduplicates_spellings_of_one_file() {
        let root = TempDir::new().unwrap();
        let input = root.path().join("same.png");
        touch(&input);
        touch(&root.path().join("sub").join("other.png"));
        let dotted = root.path().join("sub").join("..").join("same.png");

        let jobs = planner(OutputTarget::Directory(root.path().join("out")))
            .plan([&input, &dotted])
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output_path(), root.path().join("out/same.webp"));
    }

    #[test]
    fn test_uncreatable_directory_is_fatal() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, b"file, not dir").unwrap();

        let err = planner(OutputTarget::Directory(blocker.join("out")))
            .plan([root.path().join("a.png")])
            .unwrap_err();
        assert!(matches!(err, Error::OutputDirectory { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_resize_rejected() {
        let result = BatchPlanner::new(
            ResizeSpec::Percentage { percent: 0 },
            EncodeSpec::new(OutputFormat::Jpeg, 85).unwrap(),
            OutputTarget::BesideInputs,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_inputs() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("b.jpg"));
        touch(&root.path().join("a.PNG"));
        touch(&root.path().join("notes.txt"));
        touch(&root.path().join("nested/c.nef"));

        let flat = discover_inputs(&[root.path()], false);
        assert_eq!(flat, vec![root.path().join("a.PNG"), root.path().join("b.jpg")]);

        let deep = discover_inputs(&[root.path()], true);
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&root.path().join("nested/c.nef")));

        let explicit = discover_inputs(
            &[root.path().join("notes.txt"), root.path().join("b.jpg")],
            false,
        );
        assert_eq!(explicit, vec![root.path().join("b.jpg")]);

        assert!(discover_inputs(&[root.path().join("missing")], true).is_empty());
    }
}
