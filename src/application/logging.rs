//! # Logging
//!
//! Global `tracing` setup: a plain-text session log under the configured log directory plus
//! stdout. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const SESSION_LOG: &str = "session.log";

const DEFAULT_FILTER: &str =
    "info,matrix_sdk=warn,matrix_sdk_base=warn,matrix_sdk_crypto=error,ruma=warn,hyper=warn";

/// Install the global subscriber. Keep the returned guard alive until shutdown or buffered
/// lines are lost.
pub fn init(log_dir: &str) -> Result<WorkerGuard> {
    let dir = prepare_log_dir(Path::new(log_dir))?;

    let file_appender = tracing_appender::rolling::never(&dir, SESSION_LOG);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Create the log directory and clear the previous session's log.
fn prepare_log_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let previous = dir.join(SESSION_LOG);
    if previous.exists() {
        fs::remove_file(&previous)
            .with_context(|| format!("Failed to clear {}", previous.display()))?;
    }
    Ok(dir.to_path_buf())
}
