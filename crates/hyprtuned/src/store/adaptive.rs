//! adaptive.db: captured user contexts and the configuration change log.

use super::open_connection;
use anyhow::Result;
use hyprtune_common::{ConfigChange, UserContext};
use rusqlite::{params, Connection};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_contexts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    hour_of_day INTEGER NOT NULL,
    day_of_week INTEGER NOT NULL,
    active_applications TEXT NOT NULL,
    workspace_layout TEXT NOT NULL,
    window_count INTEGER NOT NULL,
    screen_brightness REAL NOT NULL,
    system_load REAL NOT NULL,
    battery_level REAL NOT NULL,
    is_gaming INTEGER NOT NULL,
    is_coding INTEGER NOT NULL,
    is_media INTEGER NOT NULL,
    activity TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contexts_timestamp ON user_contexts(timestamp);

CREATE TABLE IF NOT EXISTS config_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    config_key TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT NOT NULL,
    change_source TEXT NOT NULL,
    bucket TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changes_timestamp ON config_changes(timestamp);
"#;

pub struct AdaptiveStore {
    conn: Connection,
}

impl AdaptiveStore {
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            conn: open_connection(path.as_ref(), SCHEMA)?,
        })
    }

    /// Store a context, returning its row id.
    pub fn insert_context(&self, ctx: &UserContext) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO user_contexts (
                timestamp, hour_of_day, day_of_week, active_applications, workspace_layout,
                window_count, screen_brightness, system_load, battery_level,
                is_gaming, is_coding, is_media, activity
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                ctx.timestamp,
                ctx.hour_of_day,
                ctx.day_of_week,
                serde_json::to_string(&ctx.active_applications)?,
                ctx.workspace_layout,
                ctx.window_count,
                ctx.screen_brightness,
                ctx.system_load,
                ctx.battery_level,
                ctx.is_gaming,
                ctx.is_coding,
                ctx.is_media,
                ctx.activity.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_change(&self, change: &ConfigChange) -> Result<()> {
        let old = match &change.old_value {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        self.conn.execute(
            "INSERT INTO config_changes (timestamp, config_key, old_value, new_value, change_source, bucket)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change.timestamp,
                change.key,
                old,
                serde_json::to_string(&change.new_value)?,
                change.source.as_str(),
                change.bucket.pattern_key(),
            ],
        )?;
        Ok(())
    }

    pub fn context_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM user_contexts", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Changes on record by source (`user`, `heuristic`, `adaptive`)
    pub fn change_count(&self, source: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM config_changes WHERE change_source = ?1",
            params![source],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Feature vectors of the newest `limit` contexts, oldest first
    pub fn recent_context_features(&self, limit: usize) -> Result<Vec<Vec<f64>>> {
        let mut stmt = self.conn.prepare(
            "SELECT hour_of_day, day_of_week, window_count, screen_brightness, system_load,
                    battery_level, is_gaming, is_coding, is_media
             FROM (SELECT * FROM user_contexts ORDER BY timestamp DESC LIMIT ?1)
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let flag = |b: bool| if b { 1.0 } else { 0.0 };
            Ok(vec![
                row.get::<_, i64>(0)? as f64,
                row.get::<_, i64>(1)? as f64,
                row.get::<_, i64>(2)? as f64,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                flag(row.get(6)?),
                flag(row.get(7)?),
                flag(row.get(8)?),
            ])
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete contexts and changes older than `cutoff`; returns rows removed.
    pub fn prune(&self, cutoff: f64) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let contexts = tx.execute(
            "DELETE FROM user_contexts WHERE timestamp < ?1",
            params![cutoff],
        )?;
        let changes = tx.execute(
            "DELETE FROM config_changes WHERE timestamp < ?1",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(contexts + changes)
    }

    /// Stored context timestamps, ascending
    pub fn context_timestamps(&self) -> Result<Vec<f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp FROM user_contexts ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyprtune_common::{ActivityLabel, ChangeSource, ConfigValue};

    fn context(ts: f64, hour: u32) -> UserContext {
        UserContext {
            timestamp: ts,
            hour_of_day: hour,
            day_of_week: 2,
            active_applications: vec!["kitty".into()],
            workspace_layout: "workspaces_2".into(),
            window_count: 3,
            screen_brightness: 0.5,
            system_load: 1.0,
            battery_level: 80.0,
            is_gaming: false,
            is_coding: true,
            is_media: false,
            activity: ActivityLabel::Development,
        }
    }

    #[test]
    fn test_context_features_match_in_memory_features() {
        let dir = tempfile::tempdir().unwrap();
        let store = AdaptiveStore::open_at(dir.path().join("adaptive.db")).unwrap();
        let ctx = context(10.0, 14);
        let id = store.insert_context(&ctx).unwrap();
        assert!(id > 0);
        assert_eq!(store.recent_context_features(10).unwrap(), vec![ctx.features()]);
    }

    #[test]
    fn test_recent_features_are_limited_to_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = AdaptiveStore::open_at(dir.path().join("adaptive.db")).unwrap();
        for h in 0..5 {
            store.insert_context(&context(h as f64, h)).unwrap();
        }
        let features = store.recent_context_features(2).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0][0], 3.0);
        assert_eq!(features[1][0], 4.0);
    }

    #[test]
    fn test_change_counts_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = AdaptiveStore::open_at(dir.path().join("adaptive.db")).unwrap();
        let bucket = context(0.0, 14).bucket();
        for source in [ChangeSource::User, ChangeSource::User, ChangeSource::Adaptive] {
            store
                .insert_change(&ConfigChange {
                    timestamp: 1.0,
                    key: "general:gaps_in".into(),
                    old_value: Some(ConfigValue::Int(5)),
                    new_value: ConfigValue::Int(8),
                    source,
                    bucket,
                })
                .unwrap();
        }
        assert_eq!(store.change_count("user").unwrap(), 2);
        assert_eq!(store.change_count("adaptive").unwrap(), 1);
    }
}
