//! Logging setup and configuration
//!
//! The library crates only emit `tracing` events; the process decides where
//! they go by calling [`setup_logging`] once. After setup the filter can be
//! changed at runtime with [`set_log_level`] and [`set_logging_enabled`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing_subscriber::{EnvFilter, Registry, prelude::*, reload};

/// Verbosity levels accepted by [`set_log_level`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// `tracing` has no level above error, so this shares the error filter.
    Critical,
}

impl LogLevel {
    /// Filter directive for this level
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

struct LoggingState {
    handle: reload::Handle<EnvFilter, Registry>,
    directives: Mutex<String>,
    enabled: AtomicBool,
}

static LOGGING: OnceLock<LoggingState> = OnceLock::new();
static SETUP_LOCK: Mutex<()> = Mutex::new(());

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this more than
/// once is a no-op.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let _guard = SETUP_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if LOGGING.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;
    let directives = filter.to_string();

    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to install subscriber: {}", e)))?;

    let _ = LOGGING.set(LoggingState {
        handle,
        directives: Mutex::new(directives),
        enabled: AtomicBool::new(true),
    });
    Ok(())
}

/// Change the active log level
///
/// Before [`setup_logging`] has run this does nothing. While logging is
/// disabled the new level is remembered and applied on re-enable.
pub fn set_log_level(level: LogLevel) -> crate::Result<()> {
    let Some(state) = LOGGING.get() else {
        return Ok(());
    };

    let mut directives = state
        .directives
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    *directives = level.as_filter().to_string();

    if state.enabled.load(Ordering::Acquire) {
        reload_filter(state, &directives)?;
    }
    Ok(())
}

/// Turn all log output off or back on
pub fn set_logging_enabled(enabled: bool) -> crate::Result<()> {
    let Some(state) = LOGGING.get() else {
        return Ok(());
    };

    state.enabled.store(enabled, Ordering::Release);
    if enabled {
        let directives = state
            .directives
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        reload_filter(state, &directives)
    } else {
        reload_filter(state, "off")
    }
}

fn reload_filter(state: &LoggingState, directives: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_new(directives)
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;
    state
        .handle
        .reload(filter)
        .map_err(|e| crate::Error::Other(format!("Failed to reload log filter: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_maps_to_error() {
        assert_eq!(LogLevel::Critical.as_filter(), "error");
        assert_eq!(LogLevel::Error.as_filter(), "error");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }

    #[test]
    fn test_setup_is_idempotent() {
        assert!(setup_logging("warn").is_ok());
        assert!(setup_logging("debug").is_ok());
        assert!(set_log_level(LogLevel::Info).is_ok());
        assert!(set_logging_enabled(false).is_ok());
        assert!(set_logging_enabled(true).is_ok());
    }
}
