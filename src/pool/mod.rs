//! 工作池模块：提供有界并发工作池及基于吞吐量的池大小自动调优。
//!
//! # Worker Pool Module
//!
//! A bounded worker pool for named tasks, plus a tuner that keeps adjusting the pool's
//! capacity to maximise measured throughput.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`NamedTask`] | A unit of work with a name and a completion code |
//! | [`FnTask`] | Wraps a future resolving to an exit code |
//! | [`BoundedWorkerPool`] | Admits at most `capacity` concurrent tasks, folds exit codes |
//! | [`PoolSizeTuner`] | Periodic hill-climbing search over pool capacity |
//! | [`TunablePool`] | The accessor seam between tuner and pool |
//!
//! ## Example
//!
//! ```rust,no_run
//! use adaptive_batch::pool::{BoundedWorkerPool, FnTask, PoolConfig, TunerConfig};
//!
//! # async fn run() -> adaptive_batch::Result<()> {
//! let pool = BoundedWorkerPool::with_tuner(
//!     PoolConfig::new().with_capacity(8),
//!     TunerConfig::new().with_capacity_range(2, 64),
//! )?;
//!
//! for i in 0..1000 {
//!     pool.submit(FnTask::new(format!("job-{}", i), async move { 0 })).await?;
//! }
//! pool.wait_for_drain("waiting for jobs").await?;
//! pool.shutdown().await?;
//! println!("exit code: {}", pool.exit_code());
//! # Ok(())
//! # }
//! ```
//!
//! ## Exit codes
//!
//! Each finished task contributes its [`NamedTask::exit_code`]: zero is ignored, the first
//! non-zero code becomes the pool's code, and a second different non-zero code collapses
//! it to [`EXIT_FAILURE`].

pub mod task;
pub mod tuner;
pub mod worker_pool;

pub use task::{fold_exit_code, FnTask, NamedTask, EXIT_FAILURE, EXIT_OK};
pub use tuner::{PoolSizeTuner, TunablePool, TunerConfig, TunerState};
pub use worker_pool::{BoundedWorkerPool, PoolConfig, PoolCounters};
