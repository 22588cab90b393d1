//! The execution contract shared by all decorators.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Outcome of an action run through an [`Executor`].
///
/// Failures stay `anyhow::Error` end to end, so callers can `downcast_ref` to whatever the
/// action actually raised.
pub type ActionResult = anyhow::Result<()>;

/// Runs an action, possibly adding behaviour around it (waiting, retrying, counting).
///
/// The action is a factory: decorators that run it more than once (retry) call it again
/// to get a fresh future.
pub trait Executor: Send + Sync {
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a;
}

/// Runs the action as is. The usual innermost link of a chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        Box::pin(async move { action().await })
    }
}

impl<E: Executor> Executor for Arc<E> {
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        (**self).execute(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_direct_executor_runs_once() {
        let calls = AtomicUsize::new(0);
        DirectExecutor
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_moved_unchanged() {
        #[derive(Debug, thiserror::Error)]
        #[error("disk full")]
        struct DiskFull;

        let shared = Arc::new(DirectExecutor);
        let err = shared
            .execute(|| async { Err(anyhow::Error::new(DiskFull)) })
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<DiskFull>().is_some());
    }
}
