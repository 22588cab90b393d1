//! Batch processor: turns a stream of items into batch jobs run on a worker pool.

use super::collector::BatchCollector;
use crate::pool::{fold_exit_code, BoundedWorkerPool, FnTask, PoolConfig, EXIT_FAILURE, EXIT_OK};
use crate::progress::ProgressLogger;
use crate::Result;
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Prefix of batch job names (`<name>-<n>`).
    pub name: String,
    /// `> 0`: log every N submitted and every N completed jobs, plus the wait and summary
    /// messages. `0`: only the wait and summary messages. `< 0`: no logging.
    pub job_log_period: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            name: "batch".to_string(),
            job_log_period: 1000,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_job_log_period(mut self, period: i64) -> Self {
        self.job_log_period = period;
        self
    }

    fn logs_progress(&self) -> bool {
        self.job_log_period >= 0
    }
}

/// Outcome of a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub submitted_batches: u64,
    pub completed_batches: u64,
    pub failed_batches: u64,
    /// Exit code folded over this processor's jobs.
    pub exit_code: i32,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed_batches == 0 && self.exit_code == EXIT_OK
    }
}

#[derive(Debug)]
struct JobTracker {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    exit_code: AtomicI32,
    waiting: AtomicBool,
    /// Fired whenever `completed` catches up with `submitted`.
    all_done: Notify,
    submitted_log: Option<ProgressLogger>,
    completed_log: Option<ProgressLogger>,
}

impl JobTracker {
    fn new(config: &BatchConfig) -> Self {
        let logger = |template: &str| {
            (config.job_log_period > 0)
                .then(|| ProgressLogger::new(template, config.job_log_period as u64))
        };
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            exit_code: AtomicI32::new(EXIT_OK),
            waiting: AtomicBool::new(false),
            all_done: Notify::new(),
            submitted_log: logger("{} batch job(s) submitted"),
            completed_log: logger("{} batch job(s) completed"),
        }
    }

    fn job_submitted(&self) {
        if let Some(log) = &self.submitted_log {
            log.increment();
        }
    }

    fn job_finished(&self, failed: bool) {
        if failed {
            self.failed.fetch_add(1, Ordering::SeqCst);
            let _ = self
                .exit_code
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |code| {
                    Some(fold_exit_code(code, EXIT_FAILURE))
                });
        }
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let all_done = completed == self.submitted.load(Ordering::SeqCst);
        if let Some(log) = &self.completed_log {
            log.increment();
            if all_done && self.waiting.load(Ordering::SeqCst) {
                info!("all {} batch job(s) completed", completed);
            }
        }
        if all_done {
            self.all_done.notify_waiters();
        }
    }

    fn submit_failed(&self) {
        let submitted = self.submitted.fetch_sub(1, Ordering::SeqCst) - 1;
        if submitted == self.completed.load(Ordering::SeqCst) {
            self.all_done.notify_waiters();
        }
    }

    fn is_done(&self) -> bool {
        self.completed.load(Ordering::SeqCst) == self.submitted.load(Ordering::SeqCst)
    }
}

/// Groups items into batches and runs every ready batch as one job on a worker pool.
///
/// Jobs are independent: a failing or panicking job is logged, counted in
/// [`BatchSummary::failed_batches`] and folded into the pool's exit code, and
/// accumulation continues.
pub struct BatchProcessor<B, E, J> {
    collector: BatchCollector<B, E>,
    job: Arc<J>,
    pool: Arc<BoundedWorkerPool>,
    config: BatchConfig,
    tracker: Arc<JobTracker>,
}

impl<B, E, J, Fut> BatchProcessor<B, E, J>
where
    B: Send + 'static,
    E: Send + 'static,
    J: Fn(B) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Build a processor on a new pool sized to the available parallelism.
    pub fn new(collector: BatchCollector<B, E>, job: J) -> Result<Self> {
        let pool = BoundedWorkerPool::new(PoolConfig::new().with_name("batch-processor"))?;
        Ok(Self::with_pool(collector, job, pool))
    }

    pub fn with_pool(collector: BatchCollector<B, E>, job: J, pool: Arc<BoundedWorkerPool>) -> Self {
        let config = BatchConfig::default();
        Self {
            collector,
            job: Arc::new(job),
            pool,
            tracker: Arc::new(JobTracker::new(&config)),
            config,
        }
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.tracker = Arc::new(JobTracker::new(&config));
        self.config = config;
        self
    }

    pub fn pool(&self) -> &Arc<BoundedWorkerPool> {
        &self.pool
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Batch all items, run the jobs and wait for them.
    pub async fn process<I>(&self, items: I) -> Result<BatchSummary>
    where
        I: IntoIterator<Item = E>,
    {
        self.submit_all(items).await?;
        self.wait_completion("waiting for the batch jobs to complete")
            .await
    }

    /// Like [`process`](Self::process) over a fallible stream.
    ///
    /// A source error stops accumulation and is returned once the jobs already submitted
    /// have finished.
    pub async fn try_process<S>(&self, items: S) -> anyhow::Result<BatchSummary>
    where
        S: Stream<Item = anyhow::Result<E>>,
    {
        let submitted = self.submit_stream(items).await;
        match submitted {
            Ok(()) => Ok(self
                .wait_completion("waiting for the batch jobs to complete")
                .await?),
            Err(source_error) => {
                if let Err(e) = self.wait_jobs("draining after a source error").await {
                    warn!("could not drain the batch jobs after a source error: {}", e);
                }
                Err(source_error)
            }
        }
    }

    async fn submit_stream<S>(&self, items: S) -> anyhow::Result<()>
    where
        S: Stream<Item = anyhow::Result<E>>,
    {
        let mut items = std::pin::pin!(items);
        let mut batch = self.collector.new_batch();
        while let Some(item) = items.next().await {
            self.collector.accumulate(&mut batch, item?);
            if self.collector.is_ready(&batch) {
                let full = std::mem::replace(&mut batch, self.collector.new_batch());
                self.submit_batch(full).await?;
            }
        }
        self.submit_batch(batch).await?;
        Ok(())
    }

    /// Batch and submit all items without waiting for the jobs.
    ///
    /// The last batch is always submitted, even if it is empty or not ready.
    pub async fn submit_all<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
    {
        let mut batch = self.collector.new_batch();
        for item in items {
            self.collector.accumulate(&mut batch, item);
            if self.collector.is_ready(&batch) {
                let full = std::mem::replace(&mut batch, self.collector.new_batch());
                self.submit_batch(full).await?;
            }
        }
        self.submit_batch(batch).await
    }

    async fn submit_batch(&self, batch: B) -> Result<()> {
        // Counted before the job can finish so "completed <= submitted" always holds.
        let index = self.tracker.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("{}-{}", self.config.name, index);

        let job = Arc::clone(&self.job);
        let tracker = Arc::clone(&self.tracker);
        let job_name = name.clone();
        let task = FnTask::new(name, async move {
            let outcome = AssertUnwindSafe(async move { job(batch).await })
                .catch_unwind()
                .await;
            let failed = match outcome {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    error!(job = %job_name, "batch job failed: {:#}", e);
                    true
                }
                Err(_) => {
                    error!(job = %job_name, "batch job panicked");
                    true
                }
            };
            tracker.job_finished(failed);
            if failed {
                EXIT_FAILURE
            } else {
                EXIT_OK
            }
        });

        if let Err(e) = self.pool.submit(task).await {
            self.tracker.submit_failed();
            return Err(e);
        }
        self.tracker.job_submitted();
        Ok(())
    }

    /// Wait for every job this processor submitted and return the summary.
    ///
    /// Other work on a shared pool is not waited for. Fails with
    /// [`Error::Interrupted`](crate::Error::Interrupted) if the pool is interrupted.
    pub async fn wait_completion(&self, message: &str) -> Result<BatchSummary> {
        if self.config.logs_progress() {
            info!("{}", message);
        }
        self.tracker.waiting.store(true, Ordering::SeqCst);
        let drained = self.wait_jobs(message).await;
        self.tracker.waiting.store(false, Ordering::SeqCst);
        drained?;

        let summary = self.summary();
        if self.config.logs_progress() {
            info!(
                submitted = summary.submitted_batches,
                completed = summary.completed_batches,
                failed = summary.failed_batches,
                exit_code = summary.exit_code,
                "batch processing finished"
            );
        }
        Ok(summary)
    }

    async fn wait_jobs(&self, message: &str) -> Result<()> {
        let period = self.pool.status_period();
        let mut status = tokio::time::interval_at(Instant::now() + period, period);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let notified = self.tracker.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.tracker.is_done() {
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = status.tick() => {
                    if self.config.logs_progress() {
                        let s = self.summary();
                        info!(
                            "{}: {} of {} batch job(s) completed, please wait",
                            message, s.completed_batches, s.submitted_batches
                        );
                    }
                }
                _ = self.pool.interrupted() => {
                    return Err(self.pool.interrupted_error("waiting for the batch jobs"));
                }
            }
        }
    }

    /// Counters so far; jobs may still be running.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            submitted_batches: self.tracker.submitted.load(Ordering::SeqCst),
            completed_batches: self.tracker.completed.load(Ordering::SeqCst),
            failed_batches: self.tracker.failed.load(Ordering::SeqCst),
            exit_code: self.tracker.exit_code.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_force_flush_submits_empty_batch() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&sizes);
        let processor = BatchProcessor::new(BatchCollector::vec(10), move |batch: Vec<u32>| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(batch.len());
                anyhow::Ok(())
            }
        })
        .unwrap();

        let summary = processor.process(Vec::<u32>::new()).await.unwrap();
        assert_eq!(summary.submitted_batches, 1);
        assert_eq!(summary.completed_batches, 1);
        assert_eq!(*sizes.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_failed_jobs_are_counted() {
        let processor = BatchProcessor::new(BatchCollector::vec(2), |batch: Vec<u32>| async move {
            if batch.contains(&3) {
                anyhow::bail!("cannot store item 3");
            }
            anyhow::Ok(())
        })
        .unwrap()
        .with_config(BatchConfig::new().with_job_log_period(-1));

        let summary = processor.process(0..6).await.unwrap();
        assert_eq!(summary.submitted_batches, 4); // [0,1] [2,3] [4,5] []
        assert_eq!(summary.completed_batches, 4);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.exit_code, EXIT_FAILURE);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_processing() {
        let processor = BatchProcessor::new(BatchCollector::vec(1), |batch: Vec<u32>| async move {
            if batch == [1] {
                panic!("bad item");
            }
            anyhow::Ok(())
        })
        .unwrap();

        let summary = processor.process([0, 1, 2]).await.unwrap();
        assert_eq!(summary.completed_batches, 4);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.exit_code, EXIT_FAILURE);
    }
}
