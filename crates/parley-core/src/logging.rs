use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub directive: String,
    /// Write to a timestamp-named file here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: "parley=info".to_string(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.directive))
    }
}

/// Install the global tracing subscriber.
///
/// With a log directory configured, output goes to `parley_<timestamp>.log`
/// in that directory and the returned guard must be held for as long as
/// logs should be flushed. Otherwise output goes to stderr.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    if let Some(log_dir) = &config.directory {
        std::fs::create_dir_all(log_dir)?;

        let file_name = format!("parley_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let (writer, guard) = tracing_appender::non_blocking(rolling::never(log_dir, &file_name));

        tracing_subscriber::registry()
            .with(
                fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(config.filter())
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?;

        tracing::debug!(
            target: "parley::logging",
            path = %log_dir.join(&file_name).display(),
            "Tracing initialized with file output"
        );
        return Ok(Some(guard));
    }

    tracing_subscriber::registry()
        .with(
            fmt::Layer::default()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(config.filter())
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::debug!(target: "parley::logging", "Tracing initialized with stderr output");
    Ok(None)
}
