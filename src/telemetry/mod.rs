//! 日志模块：提供 tracing 订阅器初始化和可配置的日志级别。
//!
//! Logging setup for the batch runtime.
//!
//! ## Overview
//!
//! Every component in this crate logs through the `tracing` facade. Hosts that already
//! install a subscriber need nothing from here; binaries and tests can call
//! [`init_logging`] for a console subscriber driven by `RUST_LOG`.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`LogLevel`] | Serde-friendly level used where the level itself is configuration |
//! | [`init_logging`] | Installs a `tracing-subscriber` fmt subscriber with an `EnvFilter` |

use crate::error::{Error, ErrorContext};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// A configurable log level.
///
/// Used for messages whose verbosity is chosen by the caller (pool submissions, retry
/// attempts, progress checkpoints). `Off` silences the message entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing(self) -> Option<tracing::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Trace => Some(tracing::Level::TRACE),
        }
    }

    /// Whether the installed subscriber would record an event at this level.
    pub fn is_enabled(self) -> bool {
        match self {
            LogLevel::Off => false,
            LogLevel::Error => tracing::enabled!(tracing::Level::ERROR),
            LogLevel::Warn => tracing::enabled!(tracing::Level::WARN),
            LogLevel::Info => tracing::enabled!(tracing::Level::INFO),
            LogLevel::Debug => tracing::enabled!(tracing::Level::DEBUG),
            LogLevel::Trace => tracing::enabled!(tracing::Level::TRACE),
        }
    }

    /// Emit a message at this level.
    pub fn log(self, args: fmt::Arguments<'_>) {
        match self {
            LogLevel::Off => {}
            LogLevel::Error => tracing::error!("{}", args),
            LogLevel::Warn => tracing::warn!("{}", args),
            LogLevel::Info => tracing::info!("{}", args),
            LogLevel::Debug => tracing::debug!("{}", args),
            LogLevel::Trace => tracing::trace!("{}", args),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(Error::configuration_with_context(
                format!("unknown log level '{}'", other),
                ErrorContext::new().with_source("telemetry"),
            )),
        }
    }
}

/// Install a console subscriber.
///
/// `RUST_LOG` takes precedence; `default_filter` (an `EnvFilter` directive such as
/// `"info"` or `"adaptive_batch=debug"`) applies when it is unset or invalid.
/// Fails if a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| {
            Error::configuration_with_context(
                format!("failed to install tracing subscriber: {}", e),
                ErrorContext::new().with_source("telemetry"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" off ".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("loud".parse::<LogLevel>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_log_level_serde() {
        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
        assert_eq!(serde_json::to_string(&LogLevel::Trace).unwrap(), "\"trace\"");
    }

    #[test]
    fn test_log_level_off_is_never_enabled() {
        assert!(!LogLevel::Off.is_enabled());
        assert!(LogLevel::Off.as_tracing().is_none());
        // Must not panic without a subscriber
        LogLevel::Info.log(format_args!("hello {}", 1));
    }
}
