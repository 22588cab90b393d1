use super::task::{fold_exit_code, NamedTask, EXIT_FAILURE, EXIT_OK};
use super::tuner::{PoolSizeTuner, TunablePool, TunerConfig};
use crate::error::{Error, ErrorContext};
use crate::telemetry::LogLevel;
use crate::Result;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Label used in log messages.
    pub name: String,
    /// Initial number of tasks allowed to run at once.
    pub capacity: usize,
    /// How often `wait_for_drain` reports progress.
    #[serde(rename = "status_period_ms", with = "crate::config::duration_ms")]
    pub status_period: Duration,
    /// Level of the per-submission message.
    pub submission_log_level: LogLevel,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            name: "batch-pool".to_string(),
            capacity: default_capacity(),
            status_period: Duration::from_secs(60),
            submission_log_level: LogLevel::Debug,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_status_period(mut self, period: Duration) -> Self {
        self.status_period = period;
        self
    }

    pub fn with_submission_log_level(mut self, level: LogLevel) -> Self {
        self.submission_log_level = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration_with_context(
                "pool capacity must be >= 1",
                ErrorContext::new()
                    .with_field_path("pool.capacity")
                    .with_source("worker_pool"),
            ));
        }
        if self.status_period.is_zero() {
            return Err(Error::configuration_with_context(
                "status period must be positive",
                ErrorContext::new()
                    .with_field_path("pool.status_period_ms")
                    .with_source("worker_pool"),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    pub busy: usize,
    pub submitted: u64,
    pub completed: u64,
    pub capacity: usize,
    pub exit_code: i32,
}

impl PoolCounters {
    pub fn is_idle(&self) -> bool {
        self.busy == 0 && self.completed == self.submitted
    }
}

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    busy: usize,
    submitted: u64,
    completed: u64,
    exit_code: i32,
    shut_down: bool,
}

impl PoolState {
    fn counters(&self) -> PoolCounters {
        PoolCounters {
            busy: self.busy,
            submitted: self.submitted,
            completed: self.completed,
            capacity: self.capacity,
            exit_code: self.exit_code,
        }
    }
}

/// Runs named tasks with at most `capacity` of them in flight.
///
/// `submit` waits while the pool is full, then spawns the task on the tokio runtime the
/// pool was created on. Capacity can change at any time (`resize`, or an attached
/// [`PoolSizeTuner`]); a smaller capacity never affects tasks already running, it only
/// delays admission of new ones.
///
/// Task outcomes are folded into a single exit code (see
/// [`fold_exit_code`](super::fold_exit_code)). Panics are caught and count as
/// [`EXIT_FAILURE`].
pub struct BoundedWorkerPool {
    name: String,
    status_period: Duration,
    submission_log_level: LogLevel,
    state: Mutex<PoolState>,
    slot_freed: Notify,
    drained: Notify,
    interrupted: CancellationToken,
    runtime: Handle,
    tuner: Option<PoolSizeTuner>,
}

impl BoundedWorkerPool {
    /// Create a fixed-capacity pool. Must be called within a tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    /// Create a pool whose capacity is retuned by a [`PoolSizeTuner`].
    ///
    /// The tuner starts with the first submission and stops on `shutdown`.
    pub fn with_tuner(config: PoolConfig, tuner: TunerConfig) -> Result<Arc<Self>> {
        tuner.validate()?;
        Self::build(config, Some(PoolSizeTuner::new(tuner)))
    }

    fn build(config: PoolConfig, tuner: Option<PoolSizeTuner>) -> Result<Arc<Self>> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            Error::configuration_with_context(
                format!("a worker pool needs a tokio runtime: {}", e),
                ErrorContext::new().with_source("worker_pool"),
            )
        })?;

        Ok(Arc::new(Self {
            name: config.name,
            status_period: config.status_period,
            submission_log_level: config.submission_log_level,
            state: Mutex::new(PoolState {
                capacity: config.capacity,
                busy: 0,
                submitted: 0,
                completed: 0,
                exit_code: EXIT_OK,
                shut_down: false,
            }),
            slot_freed: Notify::new(),
            drained: Notify::new(),
            interrupted: CancellationToken::new(),
            runtime,
            tuner,
        }))
    }

    // Nothing panics while holding the lock, a poisoned state is still consistent.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a task, waiting for a free slot.
    ///
    /// Fails with [`Error::ShutDown`] after `shutdown`/`interrupt`, and with
    /// [`Error::Interrupted`] when the pool is shut down while this call is waiting.
    pub async fn submit<T: NamedTask>(self: &Arc<Self>, task: T) -> Result<()> {
        if let Some(tuner) = &self.tuner {
            if !tuner.is_active() && !self.lock_state().shut_down {
                tuner.start(self)?;
            }
        }

        let mut waited = false;
        let counters = loop {
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.lock_state();
                if st.shut_down {
                    return Err(if waited {
                        self.interrupted_error("waiting for a free pool slot")
                    } else {
                        Error::shut_down(self.name.clone())
                    });
                }
                if st.busy < st.capacity {
                    st.busy += 1;
                    st.submitted += 1;
                    break st.counters();
                }
            }

            waited = true;
            tokio::select! {
                _ = &mut notified => {}
                _ = self.interrupted.cancelled() => {
                    return Err(self.interrupted_error("waiting for a free pool slot"));
                }
            }
        };

        let task_name = task.name().to_string();
        self.submission_log_level.log(format_args!(
            "[{}] submitted: {}, {} task(s) running, {} completed",
            self.name, task_name, counters.busy, counters.completed
        ));

        let pool = Arc::clone(self);
        self.runtime.spawn(async move {
            let mut task = task;
            let outcome = AssertUnwindSafe(task.run()).catch_unwind().await;
            let code = match outcome {
                Ok(()) => task.exit_code(),
                Err(panic) => {
                    error!(
                        pool = %pool.name,
                        task = %task_name,
                        "task panicked: {}",
                        panic_message(&*panic)
                    );
                    EXIT_FAILURE
                }
            };
            pool.release(&task_name, code);
        });

        Ok(())
    }

    fn release(&self, task_name: &str, code: i32) {
        let idle = {
            let mut st = self.lock_state();
            st.busy -= 1;
            st.completed += 1;
            st.exit_code = fold_exit_code(st.exit_code, code);
            trace!(
                pool = %self.name,
                task = %task_name,
                exit_code = code,
                "released, {} task(s) running, {} completed",
                st.busy,
                st.completed
            );
            st.busy == 0 && st.completed == st.submitted
        };

        self.slot_freed.notify_waiters();
        if idle {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every submitted task has completed.
    ///
    /// Logs `message` with the current counters every status period. Fails with
    /// [`Error::Interrupted`] if the pool is interrupted meanwhile.
    pub async fn wait_for_drain(&self, message: &str) -> Result<()> {
        self.drain(message, true).await
    }

    async fn drain(&self, message: &str, interruptible: bool) -> Result<()> {
        let mut status =
            tokio::time::interval_at(Instant::now() + self.status_period, self.status_period);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock_state().counters().is_idle() {
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = status.tick() => {
                    let c = self.counters();
                    info!(
                        pool = %self.name,
                        "{}: {} task(s) running, {} completed, please wait",
                        message, c.busy, c.completed
                    );
                }
                _ = self.interrupted.cancelled(), if interruptible => {
                    return Err(self.interrupted_error("waiting for the pool to drain"));
                }
            }
        }
    }

    /// Change the capacity. Growing wakes blocked submitters; shrinking only affects
    /// future admissions.
    pub fn resize(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::configuration_with_context(
                "pool capacity must be >= 1",
                ErrorContext::new()
                    .with_details("resize(0)")
                    .with_source("worker_pool"),
            ));
        }
        self.apply_capacity(capacity);
        Ok(())
    }

    fn apply_capacity(&self, capacity: usize) {
        let previous = {
            let mut st = self.lock_state();
            std::mem::replace(&mut st.capacity, capacity)
        };
        if capacity > previous {
            self.slot_freed.notify_waiters();
        }
        trace!(pool = %self.name, previous, capacity, "pool resized");
    }

    pub fn counters(&self) -> PoolCounters {
        self.lock_state().counters()
    }

    pub fn capacity(&self) -> usize {
        self.lock_state().capacity
    }

    pub fn exit_code(&self) -> i32 {
        self.lock_state().exit_code
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock_state().shut_down
    }

    pub fn status_period(&self) -> Duration {
        self.status_period
    }

    /// Resolves once the pool is interrupted.
    pub async fn interrupted(&self) {
        self.interrupted.cancelled().await
    }

    pub(crate) fn interrupted_error(&self, operation: &str) -> Error {
        Error::interrupted_with_context(operation, ErrorContext::new().with_source(self.name.clone()))
    }

    pub fn tuner(&self) -> Option<&PoolSizeTuner> {
        self.tuner.as_ref()
    }

    /// Stop accepting work, stop the tuner and wait for running tasks to finish.
    ///
    /// Submitters blocked on a slot fail with [`Error::Interrupted`]. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.close();
        self.drain("shutting down", false).await?;
        info!(pool = %self.name, exit_code = self.exit_code(), "pool shut down");
        Ok(())
    }

    /// Like `shutdown` without waiting; also interrupts pending `wait_for_drain` calls.
    pub fn interrupt(&self) {
        self.close();
        self.interrupted.cancel();
    }

    fn close(&self) {
        self.lock_state().shut_down = true;
        if let Some(tuner) = &self.tuner {
            tuner.stop();
        }
        self.slot_freed.notify_waiters();
    }
}

impl TunablePool for BoundedWorkerPool {
    fn capacity(&self) -> usize {
        BoundedWorkerPool::capacity(self)
    }

    fn set_capacity(&self, capacity: usize) {
        self.apply_capacity(capacity.max(1));
    }

    fn completed_tasks(&self) -> u64 {
        self.lock_state().completed
    }
}

impl std::fmt::Debug for BoundedWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedWorkerPool")
            .field("name", &self.name)
            .field("counters", &self.counters())
            .field("tuned", &self.tuner.is_some())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FnTask;

    async fn explode() -> i32 {
        panic!("task blew up")
    }

    fn pool(capacity: usize) -> Arc<BoundedWorkerPool> {
        BoundedWorkerPool::new(PoolConfig::new().with_name("test").with_capacity(capacity)).unwrap()
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let err = BoundedWorkerPool::new(PoolConfig::new().with_capacity(0)).unwrap_err();
        assert!(err.is_configuration());
        assert!(pool(2).resize(0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let err = BoundedWorkerPool::new(PoolConfig::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_exit_codes_are_folded() {
        let pool = pool(2);
        for code in [0, 3, 0, 3] {
            pool.submit(FnTask::new(format!("t{}", code), async move { code }))
                .await
                .unwrap();
        }
        pool.wait_for_drain("draining").await.unwrap();
        assert_eq!(pool.exit_code(), 3);

        pool.submit(FnTask::new("other", async { 5 })).await.unwrap();
        pool.wait_for_drain("draining").await.unwrap();
        assert_eq!(pool.exit_code(), EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let pool = pool(1);
        pool.submit(FnTask::new("boom", explode())).await.unwrap();
        pool.submit(FnTask::new("fine", async { 0 })).await.unwrap();
        pool.wait_for_drain("draining").await.unwrap();

        let c = pool.counters();
        assert_eq!(c.completed, 2);
        assert_eq!(c.busy, 0);
        assert_eq!(c.exit_code, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let pool = pool(1);
        pool.shutdown().await.unwrap();
        let err = pool.submit(FnTask::new("late", async { 0 })).await.unwrap_err();
        assert!(matches!(err, Error::ShutDown { .. }));
        // idempotent
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_on_idle_pool_returns_immediately() {
        let pool = pool(1);
        pool.wait_for_drain("nothing to do").await.unwrap();
        assert!(pool.counters().is_idle());
    }

    #[tokio::test]
    async fn test_interrupt_wakes_drain_waiter() {
        let pool = pool(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(FnTask::new("blocked", async move {
            let _ = rx.await;
            0
        }))
        .await
        .unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.wait_for_drain("waiting").await })
        };
        tokio::task::yield_now().await;
        pool.interrupt();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_interrupted());

        // the running task is not cancelled
        tx.send(()).unwrap();
        pool.shutdown().await.unwrap();
        assert_eq!(pool.counters().completed, 1);
    }

    #[tokio::test]
    async fn test_tuned_pool_starts_tuner_on_first_submit() {
        let tuner = TunerConfig::new()
            .with_capacity_range(1, 8)
            .with_step_range(1, 2)
            .with_period(Duration::from_millis(50));
        let pool = BoundedWorkerPool::with_tuner(PoolConfig::new().with_capacity(2), tuner).unwrap();
        assert!(!pool.tuner().unwrap().is_active());

        pool.submit(FnTask::new("first", async { 0 })).await.unwrap();
        assert!(pool.tuner().unwrap().is_active());

        pool.shutdown().await.unwrap();
        assert!(!pool.tuner().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_with_tuner_validates_eagerly() {
        let tuner = TunerConfig::new().with_step_range(4, 2);
        let err = BoundedWorkerPool::with_tuner(PoolConfig::new(), tuner).unwrap_err();
        assert!(err.is_configuration());
    }
}
