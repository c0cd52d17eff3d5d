//! Per-run log file mirrored to the console.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: console on stderr plus
/// `<log_dir>/<prefix>_<YYYYMMDD_HHMMSS>.log`. Returns the log file path.
///
/// The level filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_run_logging(log_dir: &Path, prefix: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).with_context(|| format!("failed to create {:?}", log_dir))?;
    let path = run_log_path(log_dir, prefix, chrono::Local::now());
    let file = File::create(&path).with_context(|| format!("failed to create {:?}", path))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(path)
}

fn run_log_path<Tz>(log_dir: &Path, prefix: &str, now: chrono::DateTime<Tz>) -> PathBuf
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    log_dir.join(format!("{prefix}_{}.log", now.format("%Y%m%d_%H%M%S")))
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
