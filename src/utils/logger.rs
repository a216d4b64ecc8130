//! Logging initialization.
//!
//! The bridge owns the host's stdin/stdout as raw byte streams, so
//! diagnostics must never touch them. Logs go to a timestamped file under a
//! `logs/` directory next to the executable (overridable with
//! `PTY_BRIDGE_LOG_DIR`), one file per run.
//!
//! The log level is controlled by `RUST_LOG` and defaults to `warn`: a
//! healthy bridge writes nothing.

use std::fs;
use std::path::PathBuf;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize file-based logging.
///
/// Returns a guard that flushes the writer when dropped; hold it for the
/// lifetime of the program. Returns `None` (and stays silent) when the log
/// destination cannot be created - a missing log file must not keep the
/// bridge from running.
pub fn init_logging() -> Option<WorkerGuard> {
    let log_dir = std::env::var_os("PTY_BRIDGE_LOG_DIR")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join("logs")))
        })
        .unwrap_or_else(|| PathBuf::from("logs"));

    fs::create_dir_all(&log_dir).ok()?;

    let log_path = log_dir.join(format!(
        "pty-bridge.{}.log",
        Local::now().format("%Y-%m-%d-%H-%M-%S")
    ));
    let log_file = fs::File::create(&log_path).ok()?;

    let (writer, guard) = tracing_appender::non_blocking(log_file);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false) // no colors in log files
                .with_target(true),
        )
        .init();

    tracing::debug!("logging to {}", log_path.display());
    Some(guard)
}
