//! Bounded worker pool with cooperative cancellation

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::progress::ProgressTracker;
use super::BatchReport;
use crate::error::{Error, Result};
use crate::job::{Job, JobResult};
use crate::processing::JobRunner;

/// Cancellation flag for one batch. Written by the caller, read by every worker.
///
/// A token handed out by a [`Scheduler`] also moves its batch from
/// `Running` to `Cancelling`; a token from [`CancelToken::new`] is just a flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    batch: Option<BatchLink>,
}

#[derive(Debug, Clone)]
struct BatchLink {
    state: Arc<SharedState>,
    generation: u64,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn for_batch(state: Arc<SharedState>, generation: u64) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            batch: Some(BatchLink { state, generation }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);

        if let Some(link) = &self.batch {
            if link
                .state
                .transition(link.generation, BatchState::Running, BatchState::Cancelling)
            {
                info!("Cancellation requested for batch {}", link.generation);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Lifecycle of the scheduler's current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Cancelled,
}

impl BatchState {
    /// Whether a new batch may be submitted
    pub fn accepts_submit(self) -> bool {
        !matches!(self, Self::Running | Self::Cancelling)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Cancelling,
            3 => Self::Completed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Cancelling => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
        }
    }
}

/// Batch state plus the generation of the batch that owns it, packed into
/// one word so every transition is a single compare-and-swap.
#[derive(Debug, Default)]
struct SharedState(AtomicU64);

fn pack(generation: u64, state: BatchState) -> u64 {
    (generation << 8) | u64::from(state.as_u8())
}

fn unpack(word: u64) -> (u64, BatchState) {
    (word >> 8, BatchState::from_u8((word & 0xff) as u8))
}

impl SharedState {
    fn get(&self) -> BatchState {
        unpack(self.0.load(Ordering::SeqCst)).1
    }

    /// Move batch `generation` from `from` to `to`; fails if another batch owns the state
    fn transition(&self, generation: u64, from: BatchState, to: BatchState) -> bool {
        self.0
            .compare_exchange(
                pack(generation, from),
                pack(generation, to),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Start a new batch from a terminal state, returning its generation
    fn claim(&self) -> Option<u64> {
        let current = self.0.load(Ordering::SeqCst);
        let (generation, state) = unpack(current);
        if !state.accepts_submit() {
            return None;
        }

        let next = generation + 1;
        self.0
            .compare_exchange(
                current,
                pack(next, BatchState::Running),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| next)
    }

    /// Hand batch `generation` over to a terminal state
    fn release(&self, generation: u64, terminal: BatchState) -> bool {
        [BatchState::Running, BatchState::Cancelling]
            .into_iter()
            .any(|from| self.transition(generation, from, terminal))
    }
}

/// Runs one job on a worker. [`JobRunner`] is the production executor.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: &Job, cancel: &CancelToken) -> JobResult;
}

impl JobExecutor for JobRunner {
    fn execute(&self, job: &Job, cancel: &CancelToken) -> JobResult {
        self.run(job, cancel)
    }
}

/// Default pool size: one core left for the caller, never below one
pub fn default_concurrency() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Fixed-size pool that runs one batch of jobs at a time.
///
/// A batch stays `Running` (or `Cancelling`) until its [`BatchHandle`] is
/// finished or dropped; only then does the scheduler accept another.
pub struct Scheduler<E = JobRunner> {
    executor: Arc<E>,
    concurrency: AtomicUsize,
    state: Arc<SharedState>,
    current: Mutex<CancelToken>,
    progress: Arc<ProgressTracker>,
}

impl Scheduler<JobRunner> {
    /// Create a scheduler running jobs with the default [`JobRunner`]
    pub fn new(concurrency: usize) -> Self {
        Self::with_executor(JobRunner::new(), concurrency)
    }
}

impl Default for Scheduler<JobRunner> {
    fn default() -> Self {
        Self::new(default_concurrency())
    }
}

impl<E: JobExecutor> Scheduler<E> {
    /// Create a scheduler with a custom executor
    pub fn with_executor(executor: E, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        info!("Initializing scheduler with {} worker(s)", concurrency);

        Self {
            executor: Arc::new(executor),
            concurrency: AtomicUsize::new(concurrency),
            state: Arc::new(SharedState::default()),
            current: Mutex::new(CancelToken::new()),
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::SeqCst)
    }

    /// Change the pool size. Applies from the next batch; minimum 1.
    pub fn set_concurrency(&self, concurrency: usize) {
        let concurrency = concurrency.max(1);
        debug!("Concurrency set to {} for the next batch", concurrency);
        self.concurrency.store(concurrency, Ordering::SeqCst);
    }

    pub fn state(&self) -> BatchState {
        self.state.get()
    }

    /// Progress events and snapshots for the current batch
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Cancellation token of the most recently submitted batch
    pub fn cancel_token(&self) -> CancelToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request cancellation of the running batch.
    ///
    /// Workers stop pulling new jobs; jobs already started run to completion.
    /// No-op when nothing is running.
    pub fn cancel(&self) {
        if self.state() == BatchState::Running {
            self.cancel_token().cancel();
        }
    }

    /// Start a batch. Must be called from within a Tokio runtime.
    ///
    /// Results stream back through the returned handle, tagged with each
    /// job's position in `jobs`.
    pub fn submit(&self, jobs: Vec<Job>) -> Result<BatchHandle> {
        let generation = self.state.claim().ok_or(Error::BatchInProgress)?;

        let cancel = CancelToken::for_batch(Arc::clone(&self.state), generation);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        let total = jobs.len();
        let jobs = Arc::new(jobs);
        let worker_count = self.concurrency().min(total);

        info!(
            "Starting batch {} of {} job(s) on {} worker(s)",
            generation, total, worker_count
        );
        self.progress.start(total);

        let (queue_tx, queue_rx) = crossbeam::channel::unbounded();
        for index in 0..total {
            // The receiver is alive until the workers are spawned.
            let _ = queue_tx.send(index);
        }
        drop(queue_tx);

        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let workers = (0..worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: queue_rx.clone(),
                    jobs: Arc::clone(&jobs),
                    executor: Arc::clone(&self.executor),
                    cancel: cancel.clone(),
                    results: results_tx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        drop(results_tx);

        Ok(BatchHandle {
            generation,
            jobs,
            results: results_rx,
            slots: vec![None; total],
            workers,
            cancel,
            state: Arc::clone(&self.state),
            progress: Arc::clone(&self.progress),
            started: Instant::now(),
            released: false,
        })
    }
}

struct Worker<E> {
    id: usize,
    queue: crossbeam::channel::Receiver<usize>,
    jobs: Arc<Vec<Job>>,
    executor: Arc<E>,
    cancel: CancelToken,
    results: mpsc::UnboundedSender<(usize, JobResult)>,
}

impl<E: JobExecutor> Worker<E> {
    async fn run(self) {
        debug!("Worker {} started", self.id);
        let mut processed = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                debug!("Worker {} stopping: batch cancelled", self.id);
                break;
            }

            let Ok(index) = self.queue.try_recv() else {
                break;
            };

            let outcome = {
                let jobs = Arc::clone(&self.jobs);
                let executor = Arc::clone(&self.executor);
                let cancel = self.cancel.clone();
                tokio::task::spawn_blocking(move || executor.execute(&jobs[index], &cancel)).await
            };

            let result = outcome.unwrap_or_else(|e| {
                warn!("Worker {} lost job {}: {}", self.id, index, e);
                JobResult::failed_to_save(&self.jobs[index], format!("Worker task failed: {}", e))
            });

            processed += 1;
            if self.results.send((index, result)).is_err() {
                debug!("Worker {} stopping: result receiver dropped", self.id);
                break;
            }
        }

        debug!("Worker {} finished after {} job(s)", self.id, processed);
    }
}

/// Stream of results for one submitted batch
pub struct BatchHandle {
    generation: u64,
    jobs: Arc<Vec<Job>>,
    results: mpsc::UnboundedReceiver<(usize, JobResult)>,
    slots: Vec<Option<JobResult>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelToken,
    state: Arc<SharedState>,
    progress: Arc<ProgressTracker>,
    started: Instant,
    released: bool,
}

impl BatchHandle {
    /// Number of jobs in the batch
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The batch's cancellation token
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Next finished job as `(index, result)`, in completion order.
    ///
    /// Returns `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<(usize, JobResult)> {
        let (index, result) = self.results.recv().await?;
        self.progress.job_completed(index, &result);
        self.slots[index] = Some(result.clone());
        Some((index, result))
    }

    fn terminal_state(&self) -> BatchState {
        if self.cancel.is_cancelled() {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        }
    }

    /// Drain remaining results, wait for the pool and build the report.
    ///
    /// Jobs that never produced a result are reported as `Cancelled`, so the
    /// report always holds exactly one result per submitted job. The
    /// scheduler accepts a new batch once this returns.
    pub async fn finish(mut self) -> Result<BatchReport> {
        while self.next().await.is_some() {}

        let workers = std::mem::take(&mut self.workers);
        let joined = futures::future::join_all(workers).await;

        let state = self.terminal_state();
        self.state.release(self.generation, state);
        self.released = true;
        joined.into_iter().collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(self.jobs.len());
        let mut synthesized = 0;
        for (index, job) in self.jobs.iter().enumerate() {
            let result = match self.slots[index].take() {
                Some(result) => result,
                None => {
                    synthesized += 1;
                    let result = JobResult::cancelled(job);
                    self.progress.job_completed(index, &result);
                    result
                }
            };
            results.push(result);
        }

        let report = BatchReport::new(results, state, self.started.elapsed());
        self.progress.finish(state);

        info!(
            "Batch {:?}: {} succeeded, {} failed, {} cancelled ({} never started) in {:.2}s",
            state,
            report.succeeded(),
            report.failed(),
            report.cancelled(),
            synthesized,
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // An abandoned batch must not keep the scheduler busy forever.
        let workers = std::mem::take(&mut self.workers);
        if workers.iter().any(|w| !w.is_finished()) {
            self.cancel.cancel();
        }

        let state = Arc::clone(&self.state);
        let generation = self.generation;
        let terminal = self.terminal_state();
        debug!("Batch {} dropped before finish; releasing as {:?}", generation, terminal);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    futures::future::join_all(workers).await;
                    state.release(generation, terminal);
                });
            }
            Err(_) => {
                state.release(generation, terminal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EncodeSpec, JobStatus};
    use crate::parallel::ProgressUpdate;
    use crate::processing::{OutputFormat, ResizeSpec};
    use std::time::Duration;

    fn jobs(count: usize) -> Vec<Job> {
        (0..count)
            .map(|i| {
                Job::new(
                    i as u64,
                    format!("in_{i}.png"),
                    format!("out_{i}.jpg"),
                    ResizeSpec::NoResize,
                    EncodeSpec::new(OutputFormat::Jpeg, 85).unwrap(),
                )
                .unwrap()
            })
            .collect()
    }

    fn success(job: &Job) -> JobResult {
        let mut result = JobResult::cancelled(job);
        result.status = JobStatus::Success;
        result.message = None;
        result
    }

    /// Succeeds after a short sleep; records how many jobs ran at once
    #[derive(Default)]
    struct SleepyExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl JobExecutor for SleepyExecutor {
        fn execute(&self, job: &Job, cancel: &CancelToken) -> JobResult {
            if cancel.is_cancelled() {
                return JobResult::cancelled(job);
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            self.running.fetch_sub(1, Ordering::SeqCst);
            success(job)
        }
    }

    /// Cancels the batch once `after` jobs have finished
    struct CancellingExecutor {
        after: usize,
        done: AtomicUsize,
    }

    impl CancellingExecutor {
        fn new(after: usize) -> Self {
            Self {
                after,
                done: AtomicUsize::new(0),
            }
        }
    }

    impl JobExecutor for CancellingExecutor {
        fn execute(&self, job: &Job, cancel: &CancelToken) -> JobResult {
            if cancel.is_cancelled() {
                return JobResult::cancelled(job);
            }
            let result = success(job);
            if self.done.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                cancel.cancel();
            }
            result
        }
    }

    #[test]
    fn test_default_concurrency() {
        assert!(default_concurrency() >= 1);
        assert_eq!(Scheduler::new(0).concurrency(), 1);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_every_job_reported_once() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 3);
        let mut handle = scheduler.submit(jobs(10)).unwrap();

        let mut seen = vec![0u32; 10];
        while let Some((index, result)) = handle.next().await {
            assert_eq!(result.job_id, index as u64);
            seen[index] += 1;
        }
        assert!(seen.iter().all(|&n| n == 1), "{seen:?}");

        let report = handle.finish().await.unwrap();
        assert_eq!(report.results.len(), 10);
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(scheduler.state(), BatchState::Completed);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 2);
        let report = scheduler.submit(jobs(8)).unwrap().finish().await.unwrap();
        assert_eq!(report.succeeded(), 8);
        assert!(scheduler.executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_submit_while_running_rejected() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 1);
        let handle = scheduler.submit(jobs(3)).unwrap();
        assert!(matches!(scheduler.submit(jobs(1)), Err(Error::BatchInProgress)));

        handle.finish().await.unwrap();
        let again = scheduler.submit(jobs(1)).unwrap().finish().await.unwrap();
        assert_eq!(again.results.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_two_of_five() {
        let scheduler = Scheduler::with_executor(CancellingExecutor::new(2), 1);
        let report = scheduler.submit(jobs(5)).unwrap().finish().await.unwrap();

        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            [
                JobStatus::Success,
                JobStatus::Success,
                JobStatus::Cancelled,
                JobStatus::Cancelled,
                JobStatus::Cancelled
            ]
        );
        assert_eq!(report.state, BatchState::Cancelled);
        assert_eq!(report.status_line(), "Cancelled (2 of 5 completed)");
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 2);
        scheduler.cancel();
        assert_eq!(scheduler.state(), BatchState::Idle);

        let report = scheduler.submit(jobs(2)).unwrap().finish().await.unwrap();
        assert_eq!(report.state, BatchState::Completed);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 4);
        let report = scheduler.submit(Vec::new()).unwrap().finish().await.unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.status_line(), "Done - 0 file(s) processed");
    }

    #[tokio::test]
    async fn test_set_concurrency_applies_next_batch() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 4);
        scheduler.set_concurrency(0);
        assert_eq!(scheduler.concurrency(), 1);

        scheduler.submit(jobs(4)).unwrap().finish().await.unwrap();
        assert_eq!(scheduler.executor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drained_handle_keeps_scheduler_busy() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 2);
        let mut first = scheduler.submit(jobs(2)).unwrap();
        while first.next().await.is_some() {}

        // Every worker has exited, but the batch is not finished yet.
        assert_eq!(scheduler.state(), BatchState::Running);
        assert!(matches!(scheduler.submit(jobs(1)), Err(Error::BatchInProgress)));

        first.finish().await.unwrap();
        assert_eq!(scheduler.state(), BatchState::Completed);

        let second = scheduler.submit(jobs(3)).unwrap();
        assert!(matches!(scheduler.submit(jobs(1)), Err(Error::BatchInProgress)));
        second.finish().await.unwrap();
    }

    #[test]
    fn test_stale_release_does_not_touch_new_batch() {
        let state = SharedState::default();
        let first = state.claim().unwrap();
        assert!(state.release(first, BatchState::Completed));

        let second = state.claim().unwrap();
        assert!(!state.release(first, BatchState::Completed));
        assert_eq!(state.get(), BatchState::Running);
        assert!(state.claim().is_none());

        assert!(state.release(second, BatchState::Cancelled));
        assert_eq!(state.get(), BatchState::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_scheduler() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 1);
        let handle = scheduler.submit(jobs(3)).unwrap();
        drop(handle);

        for _ in 0..200 {
            if scheduler.state().accepts_submit() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.state(), BatchState::Cancelled);
        assert!(scheduler.submit(jobs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_token_cancel_enters_cancelling() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 1);
        let handle = scheduler.submit(jobs(4)).unwrap();

        handle.cancel_token().cancel();
        assert_eq!(scheduler.state(), BatchState::Cancelling);
        assert!(scheduler.cancel_token().is_cancelled());

        let report = handle.finish().await.unwrap();
        assert_eq!(report.state, BatchState::Cancelled);
        assert_eq!(scheduler.state(), BatchState::Cancelled);
    }

    #[tokio::test]
    async fn test_progress_counts_unstarted_jobs() {
        let scheduler = Scheduler::with_executor(SleepyExecutor::default(), 1);
        let mut updates = scheduler.progress().subscribe();
        let handle = scheduler.submit(jobs(5)).unwrap();
        scheduler.cancel();

        let report = handle.finish().await.unwrap();
        let progress = scheduler.progress().snapshot();
        assert_eq!(progress.finished(), 5);
        assert_eq!(progress.cancelled, report.cancelled());
        assert_eq!(progress.succeeded, report.succeeded());
        assert_eq!(progress.completion_percentage, 100.0);

        let mut last = None;
        while let Ok(update) = updates.try_recv() {
            last = Some(update);
        }
        match last {
            Some(ProgressUpdate::BatchFinished { state, final_state }) => {
                assert_eq!(state, BatchState::Cancelled);
                assert_eq!(final_state.finished(), 5);
            }
            other => panic!("expected BatchFinished, got {other:?}"),
        }
    }
}
