//! 执行装饰器模块：提供限流、重试、调用统计以及装饰器链组合。
//!
//! # Execution Decorators Module
//!
//! Composable wrappers that add behaviour around an action: waiting for a rate limit,
//! retrying transient failures, counting calls. Every decorator implements the same
//! [`Executor`] contract, so they nest freely.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Executor`] | The contract: run an action factory, return its outcome |
//! | [`DirectExecutor`] | Runs the action as is |
//! | [`rate_limiter`] | Token bucket ([`RateLimiter`]) and hook-driven [`DynamicRateLimiter`] |
//! | [`retry`] | [`RetryExecutor`] with an allow-list of retryable failures |
//! | [`stats`] | [`StatsExecutor`] with periodic throughput and failure-rate logs |
//! | [`chain`] | [`Chain`] and [`ExecutorExt::wrap`] for composition |
//!
//! ## Composition
//!
//! `base.wrap(a).wrap(b)` runs `b` outermost:
//!
//! ```rust
//! use adaptive_batch::resilience::{
//!     DirectExecutor, Executor, ExecutorExt, RateLimiter, RetryConfig, RetryExecutor,
//!     StatsConfig, StatsExecutor,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! #[derive(Debug, thiserror::Error)]
//! #[error("timed out")]
//! struct Timeout;
//!
//! let executor = DirectExecutor
//!     .wrap(RateLimiter::from_rps(50.0)?)
//!     .wrap(RetryExecutor::new(RetryConfig::new())?.retry_on::<Timeout>())
//!     .wrap(StatsExecutor::new(StatsConfig::new("catalogue-api")));
//!
//! executor
//!     .execute(|| async {
//!         // call the remote service...
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Here statistics see one call per `execute`, each retry attempt waits for the rate
//! limiter, and only `Timeout` failures are retried.
//!
//! ## Interruption
//!
//! The rate limiters and the retry pause accept a
//! [`CancellationToken`](tokio_util::sync::CancellationToken). A cancelled wait fails
//! with [`Error::Interrupted`](crate::Error::Interrupted); no decorator retries or
//! suppresses it.

pub mod chain;
pub mod executor;
pub mod rate_limiter;
pub mod retry;
pub mod stats;

pub use chain::{Chain, ExecutorExt};
pub use executor::{ActionResult, DirectExecutor, Executor};
pub use rate_limiter::{DynamicRateLimiter, RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{RetryConfig, RetryExecutor};
pub use stats::{CallStats, StatsConfig, StatsExecutor};
