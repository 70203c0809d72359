//! Logging setup for the `haggle` CLI.
//!
//! One-shot subcommands (`process`, `outreach`) only need human-readable
//! stderr output. The interactive repl additionally keeps a daily-rotated
//! JSON file so negotiation decisions can be audited after the session;
//! the structured fields (`decision_id`, per-call token counts, attempt
//! outcomes) all come from the pipeline's spans.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How much logging a subcommand wants.
#[derive(Debug, Clone, Copy)]
pub enum LogMode<'a> {
    /// Human-readable stderr only, for one-shot subcommands.
    OneShot,
    /// Stderr plus a daily-rotated JSON decision log under the given
    /// directory, for the interactive repl.
    Repl {
        /// Directory the `decisions.log.YYYY-MM-DD` files land in.
        logs_dir: &'a Path,
    },
}

/// Keeps the decision-log writer alive.
///
/// Must live for the duration of the process in `Repl` mode; dropping it
/// flushes pending entries and closes the file. In `OneShot` mode it holds
/// nothing and dropping it is a no-op.
pub struct LogGuard {
    _file_writer: Option<WorkerGuard>,
}

/// Install the global subscriber for the chosen mode.
///
/// Verbosity comes from `RUST_LOG` (default: `info`) in both modes.
///
/// # Errors
///
/// Returns an error in `Repl` mode when the logs directory cannot be
/// created.
pub fn init(mode: LogMode<'_>) -> anyhow::Result<LogGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (decision_log, file_writer) = match mode {
        LogMode::OneShot => (None, None),
        LogMode::Repl { logs_dir } => {
            std::fs::create_dir_all(logs_dir).with_context(|| {
                format!("failed to create logs directory {}", logs_dir.display())
            })?;
            let appender = tracing_appender::rolling::daily(logs_dir, "decisions.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().json().with_writer(writer);
            (Some(layer), Some(guard))
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(decision_log)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LogGuard {
        _file_writer: file_writer,
    })
}
