use super::executor::{ActionResult, Executor};
use crate::error::Error;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Name used in the statistics messages.
    pub service_name: String,
    #[serde(rename = "sampling_interval_ms", with = "crate::config::duration_ms")]
    pub sampling_interval: Duration,
    /// When false, failures are counted and logged but not returned to the caller.
    pub pop_up_errors: bool,
}

impl StatsConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    pub fn with_pop_up_errors(mut self, pop_up: bool) -> Self {
        self.pop_up_errors = pop_up;
        self
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            service_name: "[Unspecified]".to_string(),
            sampling_interval: Duration::from_secs(5 * 60),
            pop_up_errors: true,
        }
    }
}

/// Counters of one completed sampling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub elapsed: Duration,
}

impl CallStats {
    pub fn calls_per_minute(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_calls as f64 * 60.0 / secs
        }
    }

    pub fn failure_percent(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 * 100.0 / self.total_calls as f64
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    started: Option<Instant>,
    total_calls: u64,
    failed_calls: u64,
    last: Option<CallStats>,
}

/// Counts calls and failures, and logs throughput once per sampling interval.
pub struct StatsExecutor {
    config: StatsConfig,
    window: Mutex<Window>,
}

impl StatsExecutor {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    fn lock_window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Statistics of the last completed window.
    pub fn last_window(&self) -> Option<CallStats> {
        self.lock_window().last
    }

    pub fn last_total_calls(&self) -> u64 {
        self.last_window().map_or(0, |s| s.total_calls)
    }

    pub fn last_failed_calls(&self) -> u64 {
        self.last_window().map_or(0, |s| s.failed_calls)
    }

    /// Calls counted in the window still open.
    pub fn current_total_calls(&self) -> u64 {
        self.lock_window().total_calls
    }

    pub fn current_failed_calls(&self) -> u64 {
        self.lock_window().failed_calls
    }

    fn record(&self, failed: bool) {
        let mut window = self.lock_window();
        window.total_calls += 1;
        if failed {
            window.failed_calls += 1;
        }

        let now = Instant::now();
        let Some(started) = window.started else {
            // the first call opens the window
            window.started = Some(now);
            return;
        };
        let elapsed = now.duration_since(started);
        if elapsed < self.config.sampling_interval {
            return;
        }

        let stats = CallStats {
            total_calls: window.total_calls,
            failed_calls: window.failed_calls,
            elapsed,
        };
        info!(
            "---- {} statistics, throughput: {:.0} calls/min, failed: {:.1} %",
            self.config.service_name,
            stats.calls_per_minute(),
            stats.failure_percent()
        );
        *window = Window {
            started: Some(now),
            total_calls: 0,
            failed_calls: 0,
            last: Some(stats),
        };
    }
}

impl Executor for StatsExecutor {
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        Box::pin(async move {
            let result = action().await;
            self.record(result.is_err());

            match result {
                Err(err) if !self.config.pop_up_errors && !Error::is_control_failure(&err) => {
                    warn!(
                        "call to {} failed, due to: {}",
                        self.config.service_name, err
                    );
                    trace!(error = ?err, "call to {} failed", self.config.service_name);
                    Ok(())
                }
                other => other,
            }
        })
    }
}
