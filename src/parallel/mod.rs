//! Parallel batch execution and reporting

use std::time::Duration;

use serde::Serialize;

use crate::job::{duration_millis, JobResult, JobStatus};

pub mod progress;
pub mod scheduler;

pub use progress::*;
pub use scheduler::*;

/// Outcome of a whole batch, one result per submitted job in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
    pub state: BatchState,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn new(results: Vec<JobResult>, state: BatchState, elapsed: Duration) -> Self {
        Self {
            results,
            state,
            elapsed,
        }
    }

    fn count(&self, status: JobStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(JobStatus::Success)
    }

    /// Hard failures: load or save
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_failure()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.count(JobStatus::Cancelled)
    }

    /// Successes carrying a residual message
    pub fn with_warnings(&self) -> usize {
        self.results.iter().filter(|r| r.has_warning()).count()
    }

    /// Jobs that ran to a terminal state other than cancellation
    pub fn completed(&self) -> usize {
        self.results.len() - self.cancelled()
    }

    /// Input bytes of successful jobs
    pub fn total_input_size(&self) -> u64 {
        self.successful().map(|r| r.original_bytes).sum()
    }

    /// Output bytes of successful jobs
    pub fn total_output_size(&self) -> u64 {
        self.successful().map(|r| r.new_bytes).sum()
    }

    fn successful(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    /// Get compression ratio
    pub fn compression_ratio(&self) -> f64 {
        let output = self.total_output_size();
        if output == 0 {
            return 1.0;
        }
        self.total_input_size() as f64 / output as f64
    }

    /// Get size reduction percentage
    pub fn size_reduction(&self) -> f64 {
        let input = self.total_input_size();
        if input == 0 {
            return 0.0;
        }
        let reduction = input.saturating_sub(self.total_output_size());
        (reduction as f64 / input as f64) * 100.0
    }

    /// One-line summary of how the batch ended
    pub fn status_line(&self) -> String {
        match self.state {
            BatchState::Cancelled | BatchState::Cancelling => format!(
                "Cancelled ({} of {} completed)",
                self.completed(),
                self.results.len()
            ),
            _ => format!("Done - {} file(s) processed", self.results.len()),
        }
    }

    /// Whether any job hard-failed
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}
