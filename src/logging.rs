//! Logging setup.
//!
//! Everything is logged through `tracing`. Two sinks are installed: the
//! console, and an append-only log file under `<exe_dir>/logs/` so a long
//! unattended session can be inspected afterwards.
//!
//! Verbosity follows `RUST_LOG` and defaults to `info`. Per-tick OCR
//! rejections are logged at `debug`, e.g.
//! ```bash
//! RUST_LOG=btd6_autoplayer=debug btd6-autoplayer.exe
//! ```

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::paths;

const LOG_FILE_NAME: &str = "btd6_autoplayer.log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global tracing subscriber (console + log file).
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_path = paths::get_logs_dir().join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string())))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Routes panics into the log so crashes during unattended runs are recorded.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        // Also goes to stderr in case the subscriber was never installed.
        eprintln!("[PANIC]{} {}", location, msg);
        tracing::error!("[PANIC]{} {}", location, msg);
    }));
}
