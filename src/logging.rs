//! Logging setup for the binary.
//!
//! Always writes to `<log_dir>/mapstash.log`; `--verbose` mirrors to stderr.
//! Filtering follows `RUST_LOG`, defaulting to `info`.

use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "mapstash.log";

/// Keep alive for as long as logs should be flushed to the file.
pub struct LoggingGuard {
  _file_guard: WorkerGuard,
}

pub fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("mapstash").join("logs"))
}

pub fn init_logging(log_dir: &Path, verbose: bool) -> Result<LoggingGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
  let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking_file)
    .with_ansi(false);

  let stderr_layer = verbose.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(LoggingGuard {
    _file_guard: file_guard,
  })
}
