//! Diagnostic log setup.
//!
//! `start` with `server.logs_dir` set gets rotating JSON files alongside
//! stderr ([`init_production`]). Everything else, including `check`, logs
//! to stderr only ([`init_cli`]). Audit records are written separately by
//! [`crate::audit`].

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file prefix inside `server.logs_dir`.
const LOG_FILE_PREFIX: &str = "viewguard.log";

/// Keeps the background file writer alive. Buffered lines are flushed on drop.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// `RUST_LOG` wins over the configured `server.log_level`.
fn env_filter(configured_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level))
}

/// Install the server subscriber: daily-rotated JSON in `logs_dir` plus
/// human-readable stderr.
///
/// # Errors
///
/// Fails when `logs_dir` cannot be created or a global subscriber is
/// already installed.
pub fn init_production(logs_dir: &Path, configured_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter(configured_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already set: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install a stderr-only subscriber. Ignored if one is already set.
pub fn init_cli(configured_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(configured_level))
        .with_writer(std::io::stderr)
        .try_init();
}
