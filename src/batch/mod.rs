//! 批处理模块：将输入项分组为批次，并在有界工作池上并发执行批处理作业。
//!
//! # Batch Processing Module
//!
//! Groups a stream of items into batches and runs one job per ready batch on a
//! [`BoundedWorkerPool`](crate::pool::BoundedWorkerPool). Submission blocks while the pool
//! is full, so memory stays bounded however large the input.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchCollector`] | Creates, fills and tests batches |
//! | [`BatchProcessor`] | Feeds items through a collector and submits jobs |
//! | [`BatchConfig`] | Job naming and progress logging |
//! | [`BatchSummary`] | Submitted, completed and failed job counts |
//!
//! ## Example
//!
//! ```rust,no_run
//! use adaptive_batch::batch::{BatchCollector, BatchProcessor};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let processor = BatchProcessor::new(BatchCollector::vec(100), |ids: Vec<u64>| async move {
//!     // write `ids` to the store...
//!     anyhow::Ok(())
//! })?;
//!
//! let summary = processor.process(0..10_000u64).await?;
//! assert!(summary.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Flushing
//!
//! When the input ends, the batch in progress is submitted whether or not it is ready,
//! including an empty one.

mod collector;
mod processor;

pub use collector::{BatchCollector, DEFAULT_MAX_BATCH_SIZE};
pub use processor::{BatchConfig, BatchProcessor, BatchSummary};
