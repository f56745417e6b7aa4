//! Persistent sample stores
//!
//! One SQLite file per loop. Each loop owns its store handle; nothing is
//! shared across tasks. Lists, maps and snapshots are stored as JSON text.
//! `prune(cutoff)` removes rows strictly older than the cutoff.

pub mod adaptive;
pub mod healing;
pub mod optimizer;

pub use adaptive::AdaptiveStore;
pub use healing::HealingStore;
pub use optimizer::OptimizerStore;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Healing data is kept for a week regardless of the retention setting
pub const HEALING_RETENTION_DAYS: u32 = 7;

/// Bounds how long a write waits on a locked database
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Seconds between prune passes
pub const PRUNE_EVERY_SECS: f64 = 3600.0;

/// Open (or create) a database in WAL mode and apply its schema.
pub(crate) fn open_connection(path: &Path, schema: &str) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(schema)
        .with_context(|| format!("Failed to apply schema to {}", path.display()))?;

    Ok(conn)
}

/// Cutoff timestamp for a retention window ending at `now`
pub fn retention_cutoff(now: f64, days: u32) -> f64 {
    now - days as f64 * 86_400.0
}
