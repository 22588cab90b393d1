//! Progress reporting at fixed checkpoints.
//!
//! A [`ProgressLogger`] keeps a counter and emits a message each time an update moves the
//! counter past a multiple of its resolution. [`PercentProgressLogger`] does the same on
//! the percentage of a known total.

use crate::telemetry::LogLevel;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Absolute,
    Percent { max_progress: u64 },
}

/// Thread-safe progress counter that logs at checkpoints.
///
/// The message template has one `{}` placeholder, replaced by the reported value.
#[derive(Debug)]
pub struct ProgressLogger {
    progress: AtomicU64,
    resolution: u64,
    template: String,
    level: LogLevel,
    scale: Scale,
}

impl ProgressLogger {
    pub fn new(template: impl Into<String>, resolution: u64) -> Self {
        Self {
            progress: AtomicU64::new(0),
            resolution: resolution.max(1),
            template: template.into(),
            level: LogLevel::Info,
            scale: Scale::Absolute,
        }
    }

    /// `"{} items processed"`, logged every `resolution` items.
    pub fn with_resolution(resolution: u64) -> Self {
        Self::new("{} items processed", resolution)
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Set the progress to an absolute value.
    pub fn update(&self, progress: u64) {
        let previous = self.progress.swap(progress, Ordering::SeqCst);
        self.report(previous, progress);
    }

    pub fn update_with_increment(&self, increment: u64) {
        let previous = self.progress.fetch_add(increment, Ordering::SeqCst);
        self.report(previous, previous.saturating_add(increment));
    }

    pub fn increment(&self) {
        self.update_with_increment(1);
    }

    /// Whether going from `previous` to `current` crosses a checkpoint.
    pub fn crosses_checkpoint(&self, previous: u64, current: u64) -> bool {
        let (previous, current) = (self.scaled(previous), self.scaled(current));
        previous / self.resolution != current / self.resolution
    }

    fn scaled(&self, value: u64) -> u64 {
        match self.scale {
            Scale::Absolute => value,
            Scale::Percent { max_progress } => percent_of(value, max_progress),
        }
    }

    fn report(&self, previous: u64, current: u64) {
        if !self.crosses_checkpoint(previous, current) {
            return;
        }
        let message = self
            .template
            .replacen("{}", &self.scaled(current).to_string(), 1);
        self.level.log(format_args!("{}", message));
    }
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::with_resolution(1000)
    }
}

fn percent_of(value: u64, max_progress: u64) -> u64 {
    if max_progress == 0 {
        return 100;
    }
    (100.0 * value as f64 / max_progress as f64).round() as u64
}

/// A [`ProgressLogger`] that reports percentages of `max_progress`.
///
/// Default resolution is 10% and the default template `"{}% done"`.
#[derive(Debug)]
pub struct PercentProgressLogger {
    inner: ProgressLogger,
    max_progress: u64,
}

impl PercentProgressLogger {
    pub fn new(max_progress: u64) -> Self {
        Self::with_template("{}% done", max_progress, 10)
    }

    pub fn with_template(
        template: impl Into<String>,
        max_progress: u64,
        resolution_percent: u64,
    ) -> Self {
        let mut inner = ProgressLogger::new(template, resolution_percent);
        inner.scale = Scale::Percent { max_progress };
        Self {
            inner,
            max_progress,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.inner.level = level;
        self
    }

    pub fn max_progress(&self) -> u64 {
        self.max_progress
    }

    pub fn percent_progress(&self) -> f64 {
        if self.max_progress == 0 {
            return 100.0;
        }
        100.0 * self.inner.progress() as f64 / self.max_progress as f64
    }

    pub fn progress(&self) -> u64 {
        self.inner.progress()
    }

    pub fn update(&self, progress: u64) {
        self.inner.update(progress);
    }

    pub fn update_with_increment(&self, increment: u64) {
        self.inner.update_with_increment(increment);
    }

    pub fn increment(&self) {
        self.inner.increment();
    }

    pub fn crosses_checkpoint(&self, previous: u64, current: u64) -> bool {
        self.inner.crosses_checkpoint(previous, current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints() {
        let logger = ProgressLogger::new("{} rows loaded", 100);
        assert!(!logger.crosses_checkpoint(0, 99));
        assert!(logger.crosses_checkpoint(99, 100));
        assert!(logger.crosses_checkpoint(50, 250));
        assert!(!logger.crosses_checkpoint(100, 199));
    }

    #[test]
    fn test_increments_accumulate() {
        let logger = ProgressLogger::with_resolution(10);
        for _ in 0..25 {
            logger.increment();
        }
        logger.update_with_increment(5);
        assert_eq!(logger.progress(), 30);
        logger.update(7);
        assert_eq!(logger.progress(), 7);
    }

    #[test]
    fn test_zero_resolution_is_clamped() {
        let logger = ProgressLogger::new("{}", 0);
        assert_eq!(logger.resolution(), 1);
        assert!(logger.crosses_checkpoint(1, 2));
    }

    #[test]
    fn test_percent_checkpoints() {
        let logger = PercentProgressLogger::new(200);
        // 19 -> 10%, 20 -> 10%: same checkpoint
        assert!(!logger.crosses_checkpoint(19, 20));
        // 18 (9%) -> 20 (10%)
        assert!(logger.crosses_checkpoint(18, 20));
        assert!(logger.crosses_checkpoint(150, 200));

        logger.update_with_increment(50);
        assert_eq!(logger.progress(), 50);
        assert_eq!(logger.percent_progress(), 25.0);
        assert_eq!(logger.max_progress(), 200);
    }

    #[test]
    fn test_concurrent_increments() {
        let logger = std::sync::Arc::new(ProgressLogger::with_resolution(1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let logger = std::sync::Arc::clone(&logger);
                std::thread::spawn(move || {
                    for _ in 0..2500 {
                        logger.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(logger.progress(), 10_000);
    }
}
