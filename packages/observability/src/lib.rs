//! # Observability
//!
//! Logging setup for amqp-reliability binaries.
//!
//! Libraries only emit `tracing` events; binaries call [`init`] or
//! [`init_with_config`] once at startup to decide where those go:
//!
//! - compact human-readable lines on stderr (the default), or
//! - JSONL lines appended to a file, optionally mirrored to stderr.
//!
//! `RUST_LOG` overrides the configured level in both cases.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "amqp-reliability-sim".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("sim.jsonl".into()),
//!     also_stderr: true,
//! });
//! ```

mod file;
mod json_layer;

pub use file::LogFileWriter;
pub use json_layer::{JsonLayer, LogEntry};

use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written on every JSONL line.
    pub service_name: String,

    /// Default filter (e.g. "info", "amqp_reliability=debug").
    /// `RUST_LOG` takes precedence.
    pub default_level: String,

    /// Write JSONL to this file instead of compact stderr output.
    pub log_path: Option<PathBuf>,

    /// With `log_path`, also print compact lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Failure to install the global subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Compact human-readable output on stderr.
fn stderr_layer<S>(default_level: &str) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(env_filter(default_level))
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging, reporting failures on stderr instead of returning
/// them. Logging is never a reason for a binary to refuse to start.
pub fn init_with_config(config: LogConfig) {
    if let Err(e) = try_init_with_config(config) {
        eprintln!("observability: {e}");
    }
}

/// Initialize logging, returning any setup failure.
pub fn try_init_with_config(config: LogConfig) -> Result<(), InitError> {
    let Some(path) = config.log_path.clone() else {
        tracing_subscriber::registry()
            .with(stderr_layer(&config.default_level))
            .try_init()?;
        return Ok(());
    };

    let writer = LogFileWriter::open(&path).map_err(|source| InitError::LogFile {
        path: path.clone(),
        source,
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), writer)
        .with_filter(env_filter(&config.default_level));

    tracing_subscriber::registry()
        .with(json_layer)
        .with(
            config
                .also_stderr
                .then(|| stderr_layer(&config.default_level)),
        )
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        log_path = %path.display(),
        "observability initialized"
    );
    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_unwritable_log_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a log file.
        let err = try_init_with_config(LogConfig {
            service_name: "test".into(),
            log_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, InitError::LogFile { .. }));
    }
}
