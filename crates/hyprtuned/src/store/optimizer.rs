//! optimizer.db: optimizer samples and the history of applied optimizations.

use super::open_connection;
use anyhow::Result;
use hyprtune_common::{ConfigValue, OptimizerSample};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS optimizer_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    cpu_usage REAL NOT NULL,
    memory_usage REAL NOT NULL,
    gpu_usage REAL NOT NULL,
    gpu_memory REAL NOT NULL,
    io_read REAL NOT NULL,
    io_write REAL NOT NULL,
    network_sent REAL NOT NULL,
    network_recv REAL NOT NULL,
    active_windows INTEGER NOT NULL,
    workspace_switches INTEGER NOT NULL,
    animation_fps REAL NOT NULL,
    power_consumption REAL NOT NULL,
    temperature REAL NOT NULL,
    battery_level REAL NOT NULL,
    user_activity_score REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_optimizer_samples_timestamp ON optimizer_samples(timestamp);

CREATE TABLE IF NOT EXISTS optimizations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    config TEXT NOT NULL,
    predicted_score REAL NOT NULL,
    applied INTEGER NOT NULL,
    failed INTEGER NOT NULL
);
"#;

pub struct OptimizerStore {
    conn: Connection,
}

impl OptimizerStore {
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            conn: open_connection(path.as_ref(), SCHEMA)?,
        })
    }

    pub fn append_sample(&self, s: &OptimizerSample) -> Result<()> {
        self.conn.execute(
            "INSERT INTO optimizer_samples (
                timestamp, cpu_usage, memory_usage, gpu_usage, gpu_memory, io_read, io_write,
                network_sent, network_recv, active_windows, workspace_switches, animation_fps,
                power_consumption, temperature, battery_level, user_activity_score
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                s.timestamp,
                s.cpu_usage,
                s.memory_usage,
                s.gpu_usage,
                s.gpu_memory,
                s.io_read,
                s.io_write,
                s.network_sent,
                s.network_recv,
                s.active_windows,
                s.workspace_switches,
                s.animation_fps,
                s.power_consumption,
                s.temperature,
                s.battery_level,
                s.user_activity_score,
            ],
        )?;
        Ok(())
    }

    /// Log one optimization pass and how many keyword calls succeeded.
    pub fn record_optimization(
        &self,
        timestamp: f64,
        config: &BTreeMap<String, ConfigValue>,
        predicted_score: f64,
        applied: usize,
        failed: usize,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO optimizations (timestamp, config, predicted_score, applied, failed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                timestamp,
                serde_json::to_string(config)?,
                predicted_score,
                applied as i64,
                failed as i64,
            ],
        )?;
        Ok(())
    }

    pub fn optimization_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM optimizations", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Timestamp of the newest optimization on record
    pub fn last_optimization(&self) -> Result<Option<f64>> {
        let ts: Option<f64> =
            self.conn
                .query_row("SELECT MAX(timestamp) FROM optimizations", [], |row| row.get(0))?;
        Ok(ts)
    }

    /// Delete samples and optimizations older than `cutoff`; returns rows removed.
    pub fn prune(&self, cutoff: f64) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let samples = tx.execute(
            "DELETE FROM optimizer_samples WHERE timestamp < ?1",
            params![cutoff],
        )?;
        let optimizations = tx.execute(
            "DELETE FROM optimizations WHERE timestamp < ?1",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(samples + optimizations)
    }

    /// Stored sample timestamps, ascending
    pub fn sample_timestamps(&self) -> Result<Vec<f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp FROM optimizer_samples ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimization_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = OptimizerStore::open_at(dir.path().join("optimizer.db")).unwrap();
        assert_eq!(store.last_optimization().unwrap(), None);

        let mut config = BTreeMap::new();
        config.insert("misc:vfr".to_string(), ConfigValue::Bool(true));
        store.record_optimization(100.0, &config, 0.61, 1, 0).unwrap();
        store.record_optimization(250.0, &config, 0.64, 0, 1).unwrap();

        assert_eq!(store.optimization_count().unwrap(), 2);
        assert_eq!(store.last_optimization().unwrap(), Some(250.0));
        assert_eq!(store.prune(200.0).unwrap(), 1);
        assert_eq!(store.optimization_count().unwrap(), 1);
    }
}
