use super::executor::{ActionResult, Executor};
use futures::future::BoxFuture;
use std::future::Future;

/// Two executors composed: `external` runs an action that runs the original action
/// through `internal`.
///
/// Build chains with [`ExecutorExt::wrap`]: `base.wrap(a).wrap(b)` behaves as `b(a(base(action)))`.
#[derive(Debug, Clone)]
pub struct Chain<External, Internal> {
    external: External,
    internal: Internal,
}

impl<External, Internal> Chain<External, Internal> {
    pub fn new(external: External, internal: Internal) -> Self {
        Self { external, internal }
    }

    pub fn external(&self) -> &External {
        &self.external
    }

    pub fn internal(&self) -> &Internal {
        &self.internal
    }
}

impl<External, Internal> Executor for Chain<External, Internal>
where
    External: Executor,
    Internal: Executor,
{
    fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ActionResult> + Send + 'a,
    {
        Box::pin(async move {
            let action = &action;
            self.external
                .execute(move || self.internal.execute(action))
                .await
        })
    }
}

/// Composition helpers available on every [`Executor`].
pub trait ExecutorExt: Executor + Sized {
    /// Put `external` around `self`.
    fn wrap<External: Executor>(self, external: External) -> Chain<External, Self> {
        Chain::new(external, self)
    }
}

impl<E: Executor> ExecutorExt for E {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::DirectExecutor;
    use std::sync::Mutex;

    /// Records "<label>:before" / "<label>:after" around the action.
    struct Tracing<'t> {
        label: &'static str,
        trail: &'t Mutex<Vec<String>>,
    }

    impl Executor for Tracing<'_> {
        fn execute<'a, F, Fut>(&'a self, action: F) -> BoxFuture<'a, ActionResult>
        where
            F: Fn() -> Fut + Send + Sync + 'a,
            Fut: Future<Output = ActionResult> + Send + 'a,
        {
            Box::pin(async move {
                self.trail.lock().unwrap().push(format!("{}:before", self.label));
                let result = action().await;
                self.trail.lock().unwrap().push(format!("{}:after", self.label));
                result
            })
        }
    }

    #[tokio::test]
    async fn test_chain_order() {
        let trail = Mutex::new(Vec::new());
        let chain = DirectExecutor
            .wrap(Tracing { label: "a", trail: &trail })
            .wrap(Tracing { label: "b", trail: &trail });

        chain
            .execute(|| async {
                trail.lock().unwrap().push("action".to_string());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            *trail.lock().unwrap(),
            vec!["b:before", "a:before", "action", "a:after", "b:after"]
        );
    }
}
