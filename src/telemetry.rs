//! Logging setup: `tracing` to stderr and to an append-only `bridge.log` in the log directory.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "bridge.log";

static INIT: OnceCell<Option<PathBuf>> = OnceCell::new();

fn default_filter(verbose: bool) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::new(v),
        _ => EnvFilter::new(if verbose { "debug" } else { "info" }),
    }
}

fn with_scoped_logging<W, T>(writer: W, verbose: bool, f: impl FnOnce() -> T) -> T
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(default_filter(verbose))
        .with_writer(writer)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Run `f` with a stderr-only subscriber, for work that happens before the log directory
/// is known (settings resolution).
pub fn with_startup_logging<T>(verbose: bool, f: impl FnOnce() -> T) -> T {
    with_scoped_logging(std::io::stderr, verbose, f)
}

/// Install the global subscriber once. Later calls are no-ops and return the first result.
///
/// Returns the log file path when file logging is active. If the file cannot be opened the
/// bridge still logs to stderr.
pub fn telemetry_init(log_dir: &Path, verbose: bool) -> Option<PathBuf> {
    INIT.get_or_init(|| {
        let path = log_dir.join(LOG_FILE_NAME);
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("agent-bridge: file logging disabled ({}): {}", path.display(), e);
                None
            }
        };
        let file_active = file.is_some();

        let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        let file_layer = file.map(|f| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(f))
        });

        let registry = tracing_subscriber::registry()
            .with(default_filter(verbose))
            .with(stderr_layer)
            .with(file_layer);
        if registry.try_init().is_err() {
            eprintln!("agent-bridge: logging init skipped (global subscriber already set)");
            return None;
        }
        file_active.then_some(path)
    })
    .clone()
}
