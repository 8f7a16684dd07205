//! `tracing` subscriber setup
//!
//! `RUST_LOG` wins over the configured level. Output goes to stderr, as text
//! or JSON lines, and optionally to a daily-rolling file.

use std::path::Path;

use parley_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{ObservabilityError, Result};

type ReloadHandle = Handle<EnvFilter, Registry>;

/// Owns the installed subscriber's reload handle and file writer guard.
///
/// Dropping it flushes and closes the log file, so binaries keep it alive
/// for the whole run.
pub struct LogManager {
    level: String,
    reload_handle: ReloadHandle,
    _guard: Option<WorkerGuard>,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("level", &self.level)
            .field("file", &self._guard.is_some())
            .finish()
    }
}

impl LogManager {
    /// Install the global subscriber. Fails if one is already installed.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = config.level.to_string();
        let filter = build_filter(&level)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let stderr_layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        };

        let (file_layer, guard) = match config.file.as_deref() {
            Some(file) => {
                let (writer, guard) = file_writer(Path::new(file))?;
                let layer = if config.json {
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(writer)
                        .boxed()
                } else {
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .boxed()
                };
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| ObservabilityError::logging(format!("Subscriber already set: {}", e)))?;

        tracing::debug!(target: "parley_observability", "Logging initialized at {}", level);

        Ok(Self {
            level,
            reload_handle,
            _guard: guard,
        })
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    /// Swap the active filter, e.g. `debug` or `parley_client=trace,info`
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(level)
            .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

        self.reload_handle
            .modify(|filter| *filter = new_filter)
            .map_err(|e| {
                ObservabilityError::logging(format!("Failed to update log level: {}", e))
            })?;
        self.level = level.to_string();

        tracing::info!(target: "parley_observability", "Log level updated to: {}", level);
        Ok(())
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| ObservabilityError::config(format!("Invalid log level: {}", e)))
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ObservabilityError::config(format!("Invalid log file: {:?}", path)))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Fresh request id for request spans
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn create_request_span(request_id: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!("request", request_id = %request_id, method = %method, path = %path)
}
