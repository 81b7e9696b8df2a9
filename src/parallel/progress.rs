//! Progress tracking for parallel operations

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::scheduler::BatchState;
use crate::job::{JobResult, JobStatus};

/// Thread-safe progress tracker for one batch at a time
pub struct ProgressTracker {
    sender: broadcast::Sender<ProgressUpdate>,
    epoch: Instant,
    started_at_nanos: AtomicU64,

    // Atomic counters for high-frequency updates
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Snapshot of batch progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_time: Duration,
    pub estimated_remaining: Option<Duration>,
    pub files_per_second: f64,
    pub completion_percentage: f64,
}

/// Progress update event
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    Started {
        total_files: usize,
    },
    JobCompleted {
        index: usize,
        input_path: PathBuf,
        status: JobStatus,
        finished: usize,
        total_files: usize,
    },
    BatchFinished {
        state: BatchState,
        final_state: ProgressState,
    },
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);

        Self {
            sender,
            epoch: Instant::now(),
            started_at_nanos: AtomicU64::new(0),
            total: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    /// Reset counters for a new batch
    pub fn start(&self, total_files: usize) {
        self.started_at_nanos
            .store(self.epoch.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.total.store(total_files, Ordering::Relaxed);
        for counter in [&self.succeeded, &self.failed, &self.cancelled] {
            counter.store(0, Ordering::Relaxed);
        }
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);

        let _ = self.sender.send(ProgressUpdate::Started { total_files });
        debug!("Started progress tracking for {} files", total_files);
    }

    /// Record one finished job
    pub fn job_completed(&self, index: usize, result: &JobResult) {
        let counter = match result.status {
            JobStatus::Success => {
                self.bytes_in.fetch_add(result.original_bytes, Ordering::Relaxed);
                self.bytes_out.fetch_add(result.new_bytes, Ordering::Relaxed);
                &self.succeeded
            }
            JobStatus::FailedToLoad | JobStatus::FailedToSave => &self.failed,
            JobStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let _ = self.sender.send(ProgressUpdate::JobCompleted {
            index,
            input_path: result.input_path.clone(),
            status: result.status,
            finished: self.finished(),
            total_files: self.total.load(Ordering::Relaxed),
        });
    }

    /// Announce the end of the batch
    pub fn finish(&self, state: BatchState) {
        let final_state = self.snapshot();
        info!(
            "Batch finished ({:?}): {}/{} files in {:.2}s",
            state,
            final_state.succeeded,
            final_state.total_files,
            final_state.elapsed_time.as_secs_f64()
        );
        let _ = self.sender.send(ProgressUpdate::BatchFinished { state, final_state });
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    fn finished(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed)
    }

    fn elapsed(&self) -> Duration {
        let start = Duration::from_nanos(self.started_at_nanos.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(start)
    }

    /// Current progress
    pub fn snapshot(&self) -> ProgressState {
        let total_files = self.total.load(Ordering::Relaxed);
        let finished = self.finished();
        let elapsed_time = self.elapsed();

        let mut state = ProgressState {
            total_files,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            elapsed_time,
            estimated_remaining: None,
            files_per_second: 0.0,
            completion_percentage: 0.0,
        };

        if total_files > 0 {
            state.completion_percentage = (finished as f64 / total_files as f64) * 100.0;
        }

        if elapsed_time.as_secs_f64() > 0.0 {
            state.files_per_second = finished as f64 / elapsed_time.as_secs_f64();

            if finished > 0 && total_files > finished {
                let avg_time_per_file = elapsed_time.as_secs_f64() / finished as f64;
                let remaining = (total_files - finished) as f64 * avg_time_per_file;
                state.estimated_remaining = Some(Duration::from_secs_f64(remaining));
            }
        }

        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    /// Jobs that produced a result so far
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Get human-readable completion status
    pub fn status_text(&self) -> String {
        if self.total_files > 0 && self.finished() >= self.total_files {
            "Completed".to_string()
        } else {
            format!("{}/{} files processed", self.finished(), self.total_files)
        }
    }

    /// Get estimated time remaining as human-readable string
    pub fn eta_text(&self) -> String {
        match self.estimated_remaining {
            Some(duration) => {
                let seconds = duration.as_secs();
                if seconds < 60 {
                    format!("{}s", seconds)
                } else if seconds < 3600 {
                    format!("{}m {}s", seconds / 60, seconds % 60)
                } else {
                    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
                }
            }
            None => "Unknown".to_string(),
        }
    }

    /// Get processing speed as human-readable string
    pub fn speed_text(&self) -> String {
        if self.files_per_second >= 1.0 {
            format!("{:.1} files/sec", self.files_per_second)
        } else if self.files_per_second > 0.0 {
            format!("{:.1} sec/file", 1.0 / self.files_per_second)
        } else {
            "Unknown".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EncodeSpec, Job};
    use crate::processing::{OutputFormat, ResizeSpec};

    fn result(status: JobStatus, original: u64, new: u64) -> JobResult {
        let job = Job::new(
            0,
            "in.png",
            "out.jpg",
            ResizeSpec::NoResize,
            EncodeSpec::new(OutputFormat::Jpeg, 85).unwrap(),
        )
        .unwrap();
        let mut result = JobResult::cancelled(&job);
        result.status = status;
        result.original_bytes = original;
        result.new_bytes = new;
        result
    }

    #[tokio::test]
    async fn test_progress_tracker_basic() {
        let tracker = ProgressTracker::new();

        tracker.start(10);
        let state = tracker.snapshot();
        assert_eq!(state.total_files, 10);
        assert_eq!(state.finished(), 0);

        tracker.job_completed(0, &result(JobStatus::Success, 1000, 400));
        tracker.job_completed(1, &result(JobStatus::FailedToLoad, 0, 0));

        let state = tracker.snapshot();
        assert_eq!(state.succeeded, 1);
        assert_eq!(state.failed, 1);
        assert_eq!(state.bytes_in, 1000);
        assert_eq!(state.bytes_out, 400);
        assert_eq!(state.completion_percentage, 20.0);
    }

    #[tokio::test]
    async fn test_progress_updates() {
        let tracker = ProgressTracker::new();
        let mut receiver = tracker.subscribe();

        tracker.start(2);
        let update = receiver.recv().await.unwrap();
        assert!(matches!(update, ProgressUpdate::Started { total_files: 2 }));

        tracker.job_completed(1, &result(JobStatus::Cancelled, 0, 0));
        let update = receiver.recv().await.unwrap();
        assert!(matches!(
            update,
            ProgressUpdate::JobCompleted {
                index: 1,
                status: JobStatus::Cancelled,
                finished: 1,
                ..
            }
        ));

        tracker.finish(BatchState::Cancelled);
        let update = receiver.recv().await.unwrap();
        assert!(matches!(
            update,
            ProgressUpdate::BatchFinished {
                state: BatchState::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn test_restart_resets_counters() {
        let tracker = ProgressTracker::new();
        tracker.start(1);
        tracker.job_completed(0, &result(JobStatus::Success, 10, 5));
        tracker.start(3);
        let state = tracker.snapshot();
        assert_eq!(state.finished(), 0);
        assert_eq!(state.total_files, 3);
        assert_eq!(state.bytes_in, 0);
    }

    #[test]
    fn test_progress_state_text() {
        let mut state = ProgressTracker::new().snapshot();
        state.total_files = 10;
        state.succeeded = 3;
        state.failed = 1;
        state.files_per_second = 2.5;
        state.estimated_remaining = Some(Duration::from_secs(125));

        assert!(state.status_text().contains("4/10"));
        assert!(state.speed_text().contains("2.5"));
        assert_eq!(state.eta_text(), "2m 5s");

        state.succeeded = 9;
        assert_eq!(state.status_text(), "Completed");
    }
}
