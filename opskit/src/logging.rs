//! Tracing setup for the opskit binaries.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics on stderr filtered by `RUST_LOG`,
//!   plus an optional transcript file that records the same events.
//!
//! - **Command output**: one `key=value` line per item on stdout, written by
//!   the CLI. Always printed, unaffected by `RUST_LOG`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` when unset. When
/// `transcript` is given, events are also appended (without ANSI colors) to
/// that file, creating parent directories as needed.
///
/// # Example
/// ```bash
/// RUST_LOG=opskit=debug opskit --log-file logs/backup.log backup
/// ```
pub fn init(default_filter: &str, transcript: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match transcript {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open transcript {}", path.display()))?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
