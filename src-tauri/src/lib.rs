pub mod ai;
pub mod config;
pub mod db;
#[cfg(feature = "desktop")]
mod desktop;
pub mod errors;
pub mod logs;
pub mod models;
pub mod render;
pub mod server;
pub mod version;

#[cfg(feature = "desktop")]
pub use crate::desktop::run;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const KEPT_LOG_FILES: usize = 30;

/// Installs the global subscriber writing JSON lines to
/// `{log_dir}/app.YYYY-MM-DD.log`. `RUST_LOG` wins over `debug`.
pub fn init_tracing(log_dir: &Path, debug: bool) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("app")
        .filename_suffix("log")
        .max_log_files(KEPT_LOG_FILES)
        .build(log_dir)
        .map_err(|error| error.to_string())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
