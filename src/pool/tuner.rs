use crate::error::{Error, ErrorContext};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

/// What the tuner needs from the pool it optimises.
pub trait TunablePool: Send + Sync + 'static {
    fn capacity(&self) -> usize;

    /// Apply a new capacity. Values come clamped to the tuner's configured range.
    fn set_capacity(&self, capacity: usize);

    /// Monotonic count of finished tasks.
    fn completed_tasks(&self) -> u64;
}

/// Parameters of the hill-climbing capacity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub min_capacity: usize,
    pub max_capacity: usize,
    /// Smallest capacity change once a direction is being explored.
    pub min_step: usize,
    /// Largest capacity change in one period.
    pub max_step: usize,
    /// Sampling period; throughput is the number of tasks completed in one period.
    #[serde(rename = "period_ms", with = "crate::config::duration_ms")]
    pub period: Duration,
    /// Relative throughput change below which a period counts as "no change".
    pub tolerance: f64,
}

impl TunerConfig {
    pub fn new() -> Self {
        Self {
            min_capacity: 5,
            max_capacity: 200,
            min_step: 5,
            max_step: 50,
            period: Duration::from_secs(5 * 60),
            tolerance: 0.1,
        }
    }

    pub fn with_capacity_range(mut self, min: usize, max: usize) -> Self {
        self.min_capacity = min;
        self.max_capacity = max;
        self
    }

    pub fn with_step_range(mut self, min: usize, max: usize) -> Self {
        self.min_step = min;
        self.max_step = max;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |field: &str, msg: String| {
            Err(Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(format!("tuner.{}", field))
                    .with_source("pool_size_tuner"),
            ))
        };

        if self.min_capacity == 0 {
            return fail("min_capacity", "min_capacity must be a positive integer".into());
        }
        if self.max_capacity < self.min_capacity {
            return fail(
                "max_capacity",
                format!(
                    "max_capacity ({}) must be >= min_capacity ({})",
                    self.max_capacity, self.min_capacity
                ),
            );
        }
        if self.min_step == 0 {
            return fail("min_step", "min_step must be a positive integer".into());
        }
        if self.max_step < self.min_step {
            return fail(
                "max_step",
                format!(
                    "max_step ({}) must be >= min_step ({})",
                    self.max_step, self.min_step
                ),
            );
        }
        if self.period.is_zero() {
            return fail("period_ms", "period must be positive".into());
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return fail(
                "tolerance",
                format!("tolerance must be a positive number, got {}", self.tolerance),
            );
        }
        Ok(())
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory of the previous sampling period plus the current step.
///
/// `tick` is the whole decision rule; the periodic driver in [`PoolSizeTuner`] only feeds
/// it the pool's counters.
#[derive(Debug, Clone)]
pub struct TunerState {
    config: TunerConfig,
    previous_capacity: usize,
    previous_throughput: u64,
    previous_completed: u64,
    step: i64,
}

impl TunerState {
    pub fn new(config: TunerConfig, capacity: usize, completed: u64) -> Self {
        let (min_step, max_step) = (config.min_step as i64, config.max_step as i64);
        let step = (((min_step + max_step) as f64) / 3.0).round() as i64;
        Self {
            previous_capacity: capacity,
            previous_throughput: 0,
            previous_completed: completed,
            step: step.clamp(min_step, max_step),
            config,
        }
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn previous_throughput(&self) -> u64 {
        self.previous_throughput
    }

    /// Run one tuning period. Returns the capacity to apply, if the pool should change.
    pub fn tick(&mut self, completed: u64, capacity: usize) -> Option<usize> {
        let cfg = &self.config;
        let (min_step, max_step) = (cfg.min_step as i64, cfg.max_step as i64);
        let cur = capacity as i64;

        let throughput = completed.saturating_sub(self.previous_completed);
        let previous = self.previous_throughput;
        let delta = throughput as f64 - previous as f64;
        // Work appearing after an idle period counts as an unbounded improvement.
        let relative = if previous == 0 {
            f64::INFINITY
        } else {
            delta / previous as f64
        };

        let decision = if previous == 0 && throughput == 0 {
            None
        } else if delta > 0.0 && relative > cfg.tolerance {
            if self.step > 0 {
                let next = cur + self.step;
                self.step = (2 * self.step).min(max_step);
                Some(next)
            } else if self.step < 0 {
                let next = cur + self.step;
                self.step = -(-2 * self.step).min(max_step);
                Some(next)
            } else {
                self.step = min_step;
                Some(cur + min_step)
            }
        } else if delta < 0.0 && -relative > cfg.tolerance {
            // The optimum is likely in between; weight both sizes by their throughput.
            let weighted = (self.previous_capacity as f64 * previous as f64
                + capacity as f64 * throughput as f64)
                / (previous + throughput) as f64;
            let mut next = weighted.round() as i64;
            if self.step > 0 {
                self.step = -((self.step as f64 / 2.0).round() as i64).max(min_step);
            } else if self.step < 0 {
                self.step = (-2 * self.step).min(max_step);
            } else {
                self.step = -min_step;
                next = cur - min_step;
            }
            Some(next)
        } else {
            self.step = 0;
            None
        };

        let next = decision.map(|n| self.clamp(n));

        trace!(
            throughput,
            change_pct = relative * 100.0,
            step = self.step,
            capacity = next.unwrap_or(capacity),
            "pool size tuner tick"
        );

        self.previous_completed = completed;
        self.previous_throughput = throughput;
        self.previous_capacity = capacity;
        next
    }

    fn clamp(&self, capacity: i64) -> usize {
        capacity.clamp(
            self.config.min_capacity as i64,
            self.config.max_capacity as i64,
        ) as usize
    }
}

/// Periodically retunes a pool's capacity to maximise completed tasks per period.
///
/// The search is a hill climb: keep moving while throughput improves, back off towards
/// a throughput-weighted midpoint when it degrades, stop when it is flat. It converges
/// best when the pool starts below the optimum.
pub struct PoolSizeTuner {
    config: TunerConfig,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PoolSizeTuner {
    pub fn new(config: TunerConfig) -> Self {
        Self {
            config,
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Validate the configuration and begin periodic tuning. No-op when already active.
    ///
    /// The driver only keeps a weak reference to the pool and ends once the pool is gone.
    pub fn start<P: TunablePool>(&self, pool: &Arc<P>) -> Result<()> {
        self.config.validate()?;

        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.as_ref().map_or(false, |h| !h.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::configuration_with_context(
                format!("the pool size tuner needs a tokio runtime: {}", e),
                ErrorContext::new().with_source("pool_size_tuner"),
            )
        })?;

        let state = TunerState::new(
            self.config.clone(),
            pool.capacity(),
            pool.completed_tasks(),
        );
        let pool: Weak<P> = Arc::downgrade(pool);
        let period = self.config.period;

        *driver = Some(runtime.spawn(Self::drive(pool, state, period)));
        trace!("pool size tuner started");
        Ok(())
    }

    async fn drive<P: TunablePool>(pool: Weak<P>, mut state: TunerState, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else {
                trace!("pool dropped, pool size tuner exiting");
                return;
            };
            let capacity = pool.capacity();
            if let Some(next) = state.tick(pool.completed_tasks(), capacity) {
                if next != capacity {
                    pool.set_capacity(next);
                }
            }
        }
    }

    /// Cancel periodic tuning. No-op when inactive.
    pub fn stop(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = driver.take() {
            handle.abort();
            trace!("pool size tuner stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }
}

impl Drop for PoolSizeTuner {
    fn drop(&mut self) {
        self.stop();
    }
}
