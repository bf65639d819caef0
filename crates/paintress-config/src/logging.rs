//! Logging setup: stderr stream plus a per-run log file.

use anyhow::Result;
use chrono::Utc;
use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Env var that silences the stderr stream while the log file keeps
/// receiving everything.
const QUIET_ENV: &str = "PAINTRESS_QUIET";

pub fn quiet_from_env() -> bool {
    std::env::var(QUIET_ENV).is_ok_and(|v| !v.is_empty() && v != "0")
}

/// Initialize the global subscriber: an env-filtered stderr layer (colored
/// only on a TTY, dropped entirely in quiet mode) and a non-blocking file
/// layer under `log_dir`.
///
/// The returned guard must live until shutdown or buffered file output is
/// lost.
pub fn init_logging(
    log_dir: &Path,
    quiet: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_name = format!("paintress-{}.log", Utc::now().format("%Y%m%d-%H%M%S"));
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let stderr_layer = (!quiet).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .ok();

    Ok(guard)
}
