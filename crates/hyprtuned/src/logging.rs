//! Tracing setup: `RUST_LOG` (else the configured level), stderr, and a plain
//! append-only log file rotated once at startup when it outgrows
//! `system.max_log_size`.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Parse sizes like `100MB`, `512K`, `1G` or plain bytes.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim().to_ascii_uppercase();
    let digits_end = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(digits_end);
    let number: u64 = number.parse().ok()?;
    let multiplier = match unit.trim().trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

/// Move `path` to `path.1` when it is larger than `max_bytes`.
pub fn rotate_if_oversized(path: &Path, max_bytes: u64) -> Result<bool> {
    let Ok(meta) = std::fs::metadata(path) else {
        return Ok(false);
    };
    if meta.len() <= max_bytes {
        return Ok(false);
    }
    let rotated = path.with_extension("log.1");
    std::fs::rename(path, &rotated)
        .with_context(|| format!("Failed to rotate {}", path.display()))?;
    Ok(true)
}

pub fn init(level: &str, log_file: &Path, max_log_size: &str) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let rotated = match parse_size(max_log_size) {
        Some(max) => rotate_if_oversized(log_file, max)?,
        None => false,
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false);

    Registry::default()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    if rotated {
        tracing::info!("Rotated oversized log file");
    }
    if parse_size(max_log_size).is_none() {
        tracing::warn!("Ignoring unparseable max_log_size '{}'", max_log_size);
    }
    Ok(())
}
