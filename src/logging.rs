//! Tracing setup: a rolling file appender plus the
//! usual `RUST_LOG`/CLI level override, matching the granularity the rest
//! of the crate logs at (`debug!` per-frame, `info!` lifecycle, `warn!`
//! recoverable faults, `error!` drops and decode failures).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Holding the returned guard keeps the non-blocking writer's background
/// thread alive for the process lifetime; dropping it flushes and stops it.
pub fn init(config: &LogConfig, working_dir: &Path, level_override: Option<&str>) -> Result<WorkerGuard, String> {
    let directory = working_dir.join(&config.directory);
    std::fs::create_dir_all(&directory)
        .map_err(|e| format!("cannot create log directory {}: {e}", directory.display()))?;

    let file_appender = tracing_appender::rolling::daily(&directory, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(guard)
}
