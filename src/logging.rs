//! Process-wide tracing setup

use crate::config::{AppConfig, ConfigError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber: `RUST_LOG` or `log_level`, a rolling file
/// in `log_dir`, and stdout unless `use_json`.
///
/// Keep the returned guard alive for the lifetime of the process or buffered
/// file output is lost. Fails if a global subscriber is already installed.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard, ConfigError> {
    let file_appender = RollingFileAppender::builder()
        .rotation(config.log_rotation()?)
        .filename_prefix(&config.log_file)
        .build(&config.log_dir)
        .map_err(|e| ConfigError::Logging(format!("{}: {}", config.log_dir, e)))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| ConfigError::Invalid(format!("log_level {}: {}", config.log_level, e)))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).try_init()
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).try_init()
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}
