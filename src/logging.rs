//! Tracing subscribers for the gateway binary.
//!
//! `start` runs long enough to need a persistent record, so it gets daily
//! JSON files under the logs directory next to a terse stderr stream.
//! `status` and `check` exit in milliseconds and only write to stderr.
//! Both honour `RUST_LOG` and fall back to `info`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Rotated files are named `wagate.log.<date>`.
const LOG_FILE_PREFIX: &str = "wagate.log";

/// Level used when `RUST_LOG` is unset or unparsable.
const DEFAULT_DIRECTIVE: &str = "info";

/// Keeps the background log writer alive.
///
/// Hold it in `main` until shutdown; buffered JSON lines are flushed when
/// it drops.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the gateway service subscriber.
///
/// Each event is written as one JSON object, including the enclosing
/// request span, to `{logs_dir}/wagate.log.YYYY-MM-DD`, and as plain text
/// to stderr.
///
/// # Errors
///
/// Fails if `logs_dir` cannot be created or a global subscriber is
/// already set.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install a stderr-only subscriber for one-shot subcommands.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
