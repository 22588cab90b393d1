use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "tuner.max_capacity")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "pool_size_tuner", "worker_pool")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the batch execution runtime.
///
/// Task failures are not represented here: they are `anyhow::Error` values (or panics)
/// contained at the task boundary and folded into the pool's exit code.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid tuner, pool or decorator parameters, detected eagerly.
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    /// A blocking wait (slot, drain, rate limit, retry pause) was interrupted.
    #[error("Interrupted while {operation}{}", format_context(.context))]
    Interrupted {
        operation: String,
        context: ErrorContext,
    },

    /// The pool no longer accepts submissions.
    #[error("Worker pool is shut down{}", format_context(.context))]
    ShutDown { context: ErrorContext },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error (yaml): {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration parse error (json): {0}")]
    Json(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new interruption error with structured context
    pub fn interrupted_with_context(operation: impl Into<String>, context: ErrorContext) -> Self {
        Error::Interrupted {
            operation: operation.into(),
            context,
        }
    }

    pub fn shut_down(source: impl Into<String>) -> Self {
        Error::ShutDown {
            context: ErrorContext::new().with_source(source),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Interrupted { context, .. }
            | Error::ShutDown { context } => Some(context),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// True for errors that no execution policy may retry or suppress.
    ///
    /// Works on `anyhow::Error` values produced by actions, so decorators can check the
    /// failure without knowing whether it came from this crate.
    pub fn is_control_failure(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Interrupted { .. }) | Some(Error::Configuration { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = Error::configuration_with_context(
            "max_capacity must be >= min_capacity",
            ErrorContext::new()
                .with_field_path("tuner.max_capacity")
                .with_source("pool_size_tuner"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("Configuration error: max_capacity"));
        assert!(msg.contains("field: tuner.max_capacity"));
        assert!(msg.contains("source: pool_size_tuner"));
    }

    #[test]
    fn test_error_display_without_context() {
        let err = Error::interrupted_with_context("waiting for a free slot", ErrorContext::new());
        assert_eq!(err.to_string(), "Interrupted while waiting for a free slot");
    }

    #[test]
    fn test_control_failure_detection() {
        let interrupted: anyhow::Error =
            Error::interrupted_with_context("sleeping", ErrorContext::new()).into();
        let config: anyhow::Error =
            Error::configuration_with_context("bad", ErrorContext::new()).into();
        let shut_down: anyhow::Error = Error::shut_down("worker_pool").into();
        let other = anyhow::anyhow!("boom");

        assert!(Error::is_control_failure(&interrupted));
        assert!(Error::is_control_failure(&config));
        assert!(!Error::is_control_failure(&shut_down));
        assert!(!Error::is_control_failure(&other));
    }

    #[test]
    fn test_context_accessor() {
        let err = Error::shut_down("worker_pool");
        assert_eq!(
            err.context().and_then(|c| c.source.as_deref()),
            Some("worker_pool")
        );
        let io: Error = std::io::Error::new(std::io::ErrorKind::Other, "x").into();
        assert!(io.context().is_none());
    }
}
