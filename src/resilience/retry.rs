use super::executor::{ActionResult, Executor};
use crate::error::{Error, ErrorContext};
use crate::telemetry::LogLevel;
use crate::Result;
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Configuration for [`RetryExecutor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    #[serde(rename = "min_pause_ms", with = "crate::config::duration_ms")]
    pub min_pause: Duration,
    #[serde(rename = "max_pause_ms", with = "crate::config::duration_ms")]
    pub max_pause: Duration,
    /// Level of the "re-attempting" message.
    pub attempt_log_level: LogLevel,
}

impl RetryConfig {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            min_pause: Duration::ZERO,
            max_pause: Duration::from_secs(3),
            attempt_log_level: LogLevel::Info,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_pause_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_pause = min;
        self.max_pause = max;
        self
    }

    pub fn with_attempt_log_level(mut self, level: LogLevel) -> Self {
        self.attempt_log_level = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be >= 1",
                ErrorContext::new()
                    .with_field_path("retry.max_attempts")
                    .with_source("retry_executor"),
            ));
        }
        if self.max_pause < self.min_pause {
            return Err(Error::configuration_with_context(
                format!(
                    "max_pause ({:?}) must be >= min_pause ({:?})",
                    self.max_pause, self.min_pause
                ),
                ErrorContext::new()
                    .with_field_path("retry.max_pause_ms")
                    .with_source("retry_executor"),
            ));
        }
        Ok(())
    }

    /// A uniformly random pause in `[min_pause, max_pause]`.
    pub fn pause(&self) -> Duration {
        if self.max_pause <= self.min_pause {
            return self.min_pause;
        }
        let mut rng = rand::thread_rng();
        rng.gen_range(self.min_pause..=self.max_pause)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

type RetryPredicate = Box<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Re-runs an action whose failure is in an allow-list of retryable kinds.
///
/// Between attempts it sleeps a random pause so competing retriers spread out. When the
/// attempts run out the last failure is returned unchanged. Failures outside the
/// allow-list, and this crate's interruption and configuration errors, are returned at
/// once.
pub struct RetryExecutor {
    config: RetryConfig,
    retryable: Vec<RetryPredicate>,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            retryable: Vec::new(),
            cancel: None,
        })
    }

    /// Retry failures that downcast to `E`.
    pub fn retry_on<E>(mut self) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.retryable
            .push(Box::new(|err: &anyhow::Error| err.is::<E>()));
        self
    }

    /// Retry failures accepted by `predicate`.
    pub fn retry_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.retryable.push(Box::new(predicate));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, err: &anyhow::Error) -> bool {
        !Error::is_control_failure(err) && self.retryable.iter().any(|p| p(err))
    }

    async fn pause(&self) -> Result<()> {
        let pause = self.config.pause();
        if pause.is_zero() {
            return Ok(());
        }
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(pause) => Ok(()),
                _ = token.cancelled() => Err(Error::interrupted_with_context(
                    "pausing before a new attempt",
                    ErrorContext::new().with_source("retry_executor"),
                )),
            },
            None => {
                tokio::time::sleep(pause).await;
                Ok(())
            }
        }
    }
}

impl Executor for RetryExecutor {
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        Box::pin(async move {
            let max_attempts = self.config.max_attempts;
            let mut attempt = 1;
            loop {
                let err = match action().await {
                    Ok(()) => return Ok(()),
                    Err(err) => err,
                };
                if !self.is_retryable(&err) {
                    return Err(err);
                }
                if attempt >= max_attempts {
                    error!(
                        "operation failed after {} attempts, returning the last error",
                        max_attempts
                    );
                    return Err(err);
                }

                self.config.attempt_log_level.log(format_args!(
                    "operation failure due to: {}, re-attempting for {} more time(s)",
                    err,
                    max_attempts - attempt
                ));
                self.pause().await?;
                attempt += 1;
            }
        })
    }
}
