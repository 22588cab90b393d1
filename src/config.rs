//! 执行配置：从 YAML/JSON 文件或环境变量加载工作池、调优器与执行装饰器的参数。
//!
//! All durations are written in milliseconds (`*_ms` keys). Every section is optional and
//! falls back to its defaults:
//!
//! ```yaml
//! pool:
//!   name: importer
//!   capacity: 16
//! tuner:
//!   min_capacity: 4
//!   max_capacity: 64
//!   period_ms: 60000
//! retry:
//!   max_attempts: 5
//!   max_pause_ms: 2000
//! rate_limit:
//!   rps: 50.0
//!   burst: 50.0
//! ```

use crate::batch::BatchConfig;
use crate::error::{Error, ErrorContext};
use crate::pool::{BoundedWorkerPool, PoolConfig, TunerConfig};
use crate::resilience::{
    RateLimiter, RateLimiterConfig, RetryConfig, RetryExecutor, StatsConfig, StatsExecutor,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Environment variable naming the configuration file read by [`ExecutionConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "ADAPTIVE_BATCH_CONFIG";

/// Serde support for `Duration` as milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub pool: PoolConfig,
    /// Present: the pool is auto-tuned.
    pub tuner: Option<TunerConfig>,
    pub retry: RetryConfig,
    pub stats: StatsConfig,
    /// Absent: calls are not rate limited.
    pub rate_limit: Option<RateLimiterConfig>,
    pub batch: BatchConfig,
}

impl ExecutionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        debug!("loading execution config from {}", path.display());
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Load the file named by `ADAPTIVE_BATCH_CONFIG`, or the defaults when it is unset.
    pub async fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()).await,
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if let Some(tuner) = &self.tuner {
            tuner.validate()?;
            if !(tuner.min_capacity..=tuner.max_capacity).contains(&self.pool.capacity) {
                debug!(
                    "pool capacity {} is outside the tuner range, the first adjustment will clamp it",
                    self.pool.capacity
                );
            }
        }
        self.retry.validate()?;
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        if self.stats.sampling_interval.is_zero() {
            return Err(Error::configuration_with_context(
                "sampling interval must be positive",
                ErrorContext::new()
                    .with_field_path("stats.sampling_interval_ms")
                    .with_source("execution_config"),
            ));
        }
        Ok(())
    }

    /// A pool built from the `pool` section, auto-tuned when `tuner` is present.
    pub fn build_pool(&self) -> Result<Arc<BoundedWorkerPool>> {
        match &self.tuner {
            Some(tuner) => BoundedWorkerPool::with_tuner(self.pool.clone(), tuner.clone()),
            None => BoundedWorkerPool::new(self.pool.clone()),
        }
    }

    pub fn build_rate_limiter(&self) -> Result<RateLimiter> {
        match &self.rate_limit {
            Some(config) => RateLimiter::new(config.clone()),
            None => Ok(RateLimiter::unbounded()),
        }
    }

    /// A retry executor with no retryable failures yet; add them with
    /// [`RetryExecutor::retry_on`] or [`RetryExecutor::retry_when`].
    pub fn build_retry(&self) -> Result<RetryExecutor> {
        RetryExecutor::new(self.retry.clone())
    }

    pub fn build_stats(&self) -> StatsExecutor {
        StatsExecutor::new(self.stats.clone())
    }
}
