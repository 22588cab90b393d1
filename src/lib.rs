//! # adaptive-batch
//!
//! 自适应并发批处理执行库：有界工作池、基于吞吐量的池大小自动调优、可组合的执行装饰器，以及批次收集前端。
//!
//! Adaptive concurrent batch execution: a bounded worker pool whose capacity is retuned
//! from measured throughput, composable execution decorators, and a batching front end
//! that turns a stream of items into pool jobs.
//!
//! ## Overview
//!
//! - **Bounded submission**: [`pool::BoundedWorkerPool::submit`] waits while the pool is
//!   full, so producers never outrun the workers
//! - **Closed-loop sizing**: [`pool::PoolSizeTuner`] hill-climbs the capacity that
//!   maximizes completed tasks per period
//! - **Decorators**: rate limiting, retry and call statistics share one
//!   [`resilience::Executor`] contract and nest with [`resilience::ExecutorExt::wrap`]
//! - **Batching**: [`batch::BatchProcessor`] groups items with a
//!   [`batch::BatchCollector`] and runs one job per batch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use adaptive_batch::batch::{BatchCollector, BatchProcessor};
//! use adaptive_batch::pool::{BoundedWorkerPool, PoolConfig, TunerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     adaptive_batch::telemetry::init_logging("info")?;
//!
//!     let pool = BoundedWorkerPool::with_tuner(
//!         PoolConfig::new().with_name("importer").with_capacity(8),
//!         TunerConfig::new().with_capacity_range(2, 64),
//!     )?;
//!     let processor = BatchProcessor::with_pool(
//!         BatchCollector::vec(500),
//!         |rows: Vec<String>| async move {
//!             // insert `rows`...
//!             anyhow::Ok(())
//!         },
//!         pool,
//!     );
//!
//!     let rows = (0..100_000).map(|i| format!("row-{i}"));
//!     let summary = processor.process(rows).await?;
//!     std::process::exit(summary.exit_code);
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`pool`] | Bounded worker pool, named tasks and the capacity tuner |
//! | [`resilience`] | Executor decorators: rate limiting, retry, statistics, chains |
//! | [`batch`] | Batch collectors and the batch processor |
//! | [`progress`] | Checkpoint-based progress logging |
//! | [`config`] | YAML/JSON execution configuration |
//! | [`telemetry`] | Log levels and subscriber setup |

pub mod batch;
pub mod config;
pub mod pool;
pub mod progress;
pub mod resilience;
pub mod telemetry;

pub use batch::{BatchCollector, BatchProcessor, BatchSummary};
pub use config::ExecutionConfig;
pub use pool::{BoundedWorkerPool, NamedTask, PoolConfig, PoolSizeTuner, TunerConfig};
pub use progress::{PercentProgressLogger, ProgressLogger};
pub use resilience::{Executor, ExecutorExt};
pub use telemetry::LogLevel;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
