//! Logging infrastructure for obfs-scout.
//!
//! This module provides logging functionality using the tracing ecosystem.
//! It writes to stdout or to a file, with a configurable minimum level.
//!
//! # Log Levels
//!
//! | Level | Description | Typical messages |
//! |-------|-------------|------------------|
//! | [`Debug`](crate::LogLevel::Debug) | Probe lifecycle, phase sizes | ports, spawn, teardown |
//! | [`Info`](crate::LogLevel::Info) | Informational messages | none from the library |
//! | [`Notice`](crate::LogLevel::Notice) | Search milestones | run start, summary, CLI progress |
//! | [`Warn`](crate::LogLevel::Warn) | Recoverable problems | leftover config files |
//! | [`Error`](crate::LogLevel::Error) | Failures | unreadable descriptor |
//!
//! `RUST_LOG` overrides the configured level when set.
//!
//! # Example
//!
//! ```rust,no_run
//! use obfs_scout::{LogLevel, logger};
//!
//! logger::init(LogLevel::Notice, None).unwrap();
//! logger::plog(LogLevel::Notice, "Phase 1/3: Baseline Test");
//! logger::plog(LogLevel::Warn, "Could not remove /tmp/obfs_scout_20000.json");
//!
//! // Or append to a file
//! logger::init(LogLevel::Debug, Some("/var/log/obfs-scout.log")).unwrap();
//! ```

use std::sync::OnceLock;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;
use crate::error::{Error, Result};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the logging system.
///
/// Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - The minimum log level to output
/// * `logfile` - `None` logs to stdout with ANSI colors, `Some(path)` appends
///   to the file at `path`
///
/// # Errors
///
/// Returns [`Error::Io`] if the log file cannot be opened.
/// Returns [`Error::Config`] if another global subscriber is already set.
pub fn init(level: LogLevel, logfile: Option<&str>) -> Result<()> {
    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    match logfile {
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_span_events(FmtSpan::NONE)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;
        }
        Some(path) => init_file_logger(path, env_filter)?,
    }

    LOGGER_INITIALIZED.get_or_init(|| ());
    Ok(())
}

/// The tracing filter for a log level. Notice has no tracing counterpart and
/// shares `info`.
pub fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info | LogLevel::Notice => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn init_file_logger(path: &str, env_filter: EnvFilter) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;

    Ok(())
}

/// Log a message at the specified level.
///
/// | LogLevel | tracing macro |
/// |----------|---------------|
/// | Debug | `debug!` |
/// | Info | `info!` |
/// | Notice | `info!` |
/// | Warn | `warn!` |
/// | Error | `error!` |
///
/// ```rust
/// use obfs_scout::{LogLevel, logger};
///
/// logger::plog(LogLevel::Notice, "Search finished");
/// ```
pub fn plog(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{}", message),
        LogLevel::Info => info!("{}", message),
        LogLevel::Notice => info!("{}", message),
        LogLevel::Warn => warn!("{}", message),
        LogLevel::Error => error!("{}", message),
    }
}

/// Log a formatted message at the specified level.
///
/// ```rust
/// use obfs_scout::{LogLevel, plog_fmt};
///
/// plog_fmt!(LogLevel::Notice, "{} of {} configurations work", 4, 17);
/// ```
#[macro_export]
macro_rules! plog_fmt {
    ($level:expr, $($arg:tt)*) => {
        $crate::logger::plog($level, &format!($($arg)*))
    };
}
