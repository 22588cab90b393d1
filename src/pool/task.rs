use async_trait::async_trait;
use std::future::Future;

/// Completion code of a task that succeeded.
pub const EXIT_OK: i32 = 0;

/// Generic failure code. Also the aggregate when tasks report different non-zero codes.
pub const EXIT_FAILURE: i32 = 1;

/// A named unit of work run by a [`BoundedWorkerPool`](super::BoundedWorkerPool).
///
/// The pool takes ownership on submission, awaits [`run`](NamedTask::run) on a runtime
/// worker and reads [`exit_code`](NamedTask::exit_code) once `run` has returned.
#[async_trait]
pub trait NamedTask: Send + 'static {
    /// Human readable label, used in log messages.
    fn name(&self) -> &str;

    async fn run(&mut self);

    /// Completion code, meaningful only after `run` returns. `0` means success.
    fn exit_code(&self) -> i32 {
        EXIT_OK
    }
}

/// Adapts a future resolving to an exit code into a [`NamedTask`].
pub struct FnTask<F> {
    name: String,
    future: Option<F>,
    exit_code: i32,
}

impl<F> FnTask<F>
where
    F: Future<Output = i32> + Send + 'static,
{
    pub fn new(name: impl Into<String>, future: F) -> Self {
        Self {
            name: name.into(),
            future: Some(future),
            exit_code: EXIT_OK,
        }
    }
}

#[async_trait]
impl<F> NamedTask for FnTask<F>
where
    F: Future<Output = i32> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) {
        if let Some(future) = self.future.take() {
            self.exit_code = future.await;
        }
    }

    fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

/// Fold a completed task's code into the aggregate exit code.
///
/// Zero codes are ignored. The first non-zero code is adopted; a later, different
/// non-zero code collapses the aggregate to [`EXIT_FAILURE`].
pub fn fold_exit_code(aggregate: i32, code: i32) -> i32 {
    if code == EXIT_OK {
        aggregate
    } else if aggregate == EXIT_OK {
        code
    } else if aggregate != code {
        EXIT_FAILURE
    } else {
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_exit_code() {
        // all zero stays zero
        assert_eq!([0, 0, 0].iter().fold(0, |a, &c| fold_exit_code(a, c)), 0);
        // a single non-zero code is adopted
        assert_eq!([0, 3, 0].iter().fold(0, |a, &c| fold_exit_code(a, c)), 3);
        // repeated identical codes keep the code
        assert_eq!([3, 3, 0].iter().fold(0, |a, &c| fold_exit_code(a, c)), 3);
        // different non-zero codes collapse to the sentinel
        assert_eq!([0, 3, 5].iter().fold(0, |a, &c| fold_exit_code(a, c)), EXIT_FAILURE);
        assert_eq!([2, 5, 2].iter().fold(0, |a, &c| fold_exit_code(a, c)), EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_fn_task_reports_future_output() {
        let mut task = FnTask::new("answer", async { 42 });
        assert_eq!(task.name(), "answer");
        assert_eq!(task.exit_code(), EXIT_OK);
        task.run().await;
        assert_eq!(task.exit_code(), 42);
        // a second run is a no-op
        task.run().await;
        assert_eq!(task.exit_code(), 42);
    }
}
