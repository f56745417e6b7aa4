//! healing.db: health samples, issues and executed healing actions.

use super::open_connection;
use anyhow::{anyhow, Result};
use hyprtune_common::{HealingActionRecord, HealthSample, Issue, Severity};
use rusqlite::{params, Connection, Row};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS system_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    cpu_usage REAL NOT NULL,
    memory_usage REAL NOT NULL,
    gpu_usage REAL NOT NULL,
    cpu_temperature REAL NOT NULL,
    gpu_temperature REAL NOT NULL,
    disk_usage REAL NOT NULL,
    network_latency REAL NOT NULL,
    active_processes INTEGER NOT NULL,
    system_load REAL NOT NULL,
    active_windows INTEGER NOT NULL,
    workspace_count INTEGER NOT NULL,
    compositor_responsive INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON system_metrics(timestamp);

CREATE TABLE IF NOT EXISTS system_issues (
    id TEXT PRIMARY KEY,
    detected_at REAL NOT NULL,
    category TEXT NOT NULL,
    severity INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    symptoms TEXT NOT NULL,
    potential_causes TEXT NOT NULL,
    suggested_fixes TEXT NOT NULL,
    trigger_metric TEXT NOT NULL,
    metrics TEXT NOT NULL,
    auto_fixable INTEGER NOT NULL,
    resolved INTEGER NOT NULL,
    resolution_attempts INTEGER NOT NULL,
    resolution_timestamp REAL
);

CREATE TABLE IF NOT EXISTS healing_actions (
    id TEXT PRIMARY KEY,
    timestamp REAL NOT NULL,
    issue_id TEXT NOT NULL,
    strategy TEXT NOT NULL,
    description TEXT NOT NULL,
    success INTEGER NOT NULL,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_actions_timestamp ON healing_actions(timestamp);
"#;

/// Rows removed by one prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneCounts {
    pub samples: usize,
    pub issues: usize,
    pub actions: usize,
}

pub struct HealingStore {
    conn: Connection,
}

impl HealingStore {
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            conn: open_connection(path.as_ref(), SCHEMA)?,
        })
    }

    pub fn append_sample(&self, s: &HealthSample) -> Result<()> {
        self.conn.execute(
            "INSERT INTO system_metrics (
                timestamp, cpu_usage, memory_usage, gpu_usage, cpu_temperature,
                gpu_temperature, disk_usage, network_latency, active_processes,
                system_load, active_windows, workspace_count, compositor_responsive
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                s.timestamp,
                s.cpu_usage,
                s.memory_usage,
                s.gpu_usage,
                s.cpu_temperature,
                s.gpu_temperature,
                s.disk_usage,
                s.network_latency_ms,
                s.active_processes as i64,
                s.system_load,
                s.active_windows,
                s.workspace_count,
                s.compositor_responsive,
            ],
        )?;
        Ok(())
    }

    /// Insert or update an issue by id.
    pub fn save_issue(&self, issue: &Issue) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO system_issues (
                id, detected_at, category, severity, title, description, symptoms,
                potential_causes, suggested_fixes, trigger_metric, metrics,
                auto_fixable, resolved, resolution_attempts, resolution_timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                issue.id,
                issue.detected_at,
                issue.category.as_str(),
                issue.severity.level(),
                issue.title,
                issue.description,
                serde_json::to_string(&issue.symptoms)?,
                serde_json::to_string(&issue.potential_causes)?,
                serde_json::to_string(&issue.suggested_fixes)?,
                issue.trigger.as_str(),
                serde_json::to_string(&issue.metrics)?,
                issue.auto_fixable,
                issue.resolved,
                issue.resolution_attempts,
                issue.resolution_timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn record_action(&self, action: &HealingActionRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO healing_actions (id, timestamp, issue_id, strategy, description, success, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action.id,
                action.timestamp,
                action.issue_id,
                action.strategy,
                action.description,
                action.success,
                action.error,
            ],
        )?;
        Ok(())
    }

    /// Unresolved issues, oldest first
    pub fn active_issues(&self) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, detected_at, category, severity, title, description, symptoms,
                    potential_causes, suggested_fixes, trigger_metric, metrics,
                    auto_fixable, resolved, resolution_attempts, resolution_timestamp
             FROM system_issues WHERE resolved = 0 ORDER BY detected_at ASC",
        )?;
        let rows = stmt.query_map([], IssueRow::from_row)?;

        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?.into_issue()?);
        }
        Ok(issues)
    }

    pub fn resolved_count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM system_issues WHERE resolved = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// (total, successful) healing actions on record
    pub fn action_counts(&self) -> Result<(usize, usize)> {
        let (total, ok): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), SUM(success) FROM healing_actions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as usize, ok.unwrap_or(0) as usize))
    }

    /// Newest `limit` actions, newest first
    pub fn recent_actions(&self, limit: usize) -> Result<Vec<HealingActionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, issue_id, strategy, description, success, error
             FROM healing_actions ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(HealingActionRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                issue_id: row.get(2)?,
                strategy: row.get(3)?,
                description: row.get(4)?,
                success: row.get(5)?,
                error: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Drop samples and actions older than `cutoff`, and issues resolved before it.
    pub fn prune(&self, cutoff: f64) -> Result<PruneCounts> {
        let tx = self.conn.unchecked_transaction()?;
        let samples = tx.execute(
            "DELETE FROM system_metrics WHERE timestamp < ?1",
            params![cutoff],
        )?;
        let issues = tx.execute(
            "DELETE FROM system_issues WHERE resolved = 1 AND resolution_timestamp < ?1",
            params![cutoff],
        )?;
        let actions = tx.execute(
            "DELETE FROM healing_actions WHERE timestamp < ?1",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(PruneCounts {
            samples,
            issues,
            actions,
        })
    }

    /// Stored sample timestamps, ascending
    pub fn sample_timestamps(&self) -> Result<Vec<f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp FROM system_metrics ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Raw `system_issues` row before the text columns are decoded
struct IssueRow {
    id: String,
    detected_at: f64,
    category: String,
    severity: i64,
    title: String,
    description: String,
    symptoms: String,
    potential_causes: String,
    suggested_fixes: String,
    trigger: String,
    metrics: String,
    auto_fixable: bool,
    resolved: bool,
    resolution_attempts: u32,
    resolution_timestamp: Option<f64>,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            detected_at: row.get(1)?,
            category: row.get(2)?,
            severity: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            symptoms: row.get(6)?,
            potential_causes: row.get(7)?,
            suggested_fixes: row.get(8)?,
            trigger: row.get(9)?,
            metrics: row.get(10)?,
            auto_fixable: row.get(11)?,
            resolved: row.get(12)?,
            resolution_attempts: row.get(13)?,
            resolution_timestamp: row.get(14)?,
        })
    }

    fn into_issue(self) -> Result<Issue> {
        Ok(Issue {
            category: self.category.parse().map_err(|e: String| anyhow!(e))?,
            severity: Severity::from_level(self.severity)
                .ok_or_else(|| anyhow!("invalid severity level {}", self.severity))?,
            trigger: self.trigger.parse().map_err(|e: String| anyhow!(e))?,
            symptoms: serde_json::from_str(&self.symptoms)?,
            potential_causes: serde_json::from_str(&self.potential_causes)?,
            suggested_fixes: serde_json::from_str(&self.suggested_fixes)?,
            metrics: serde_json::from_str(&self.metrics)?,
            id: self.id,
            detected_at: self.detected_at,
            title: self.title,
            description: self.description,
            auto_fixable: self.auto_fixable,
            resolved: self.resolved,
            resolution_attempts: self.resolution_attempts,
            resolution_timestamp: self.resolution_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyprtune_common::{IssueCategory, TriggerMetric};

    fn issue(id: &str, resolved_at: Option<f64>) -> Issue {
        Issue {
            id: id.to_string(),
            detected_at: 100.0,
            category: IssueCategory::Memory,
            severity: Severity::High,
            title: "High Memory Usage".to_string(),
            description: "Memory usage is 96.0%".to_string(),
            symptoms: vec!["Swapping".to_string()],
            potential_causes: vec![],
            suggested_fixes: vec!["clear_caches".to_string()],
            trigger: TriggerMetric::Memory,
            metrics: HealthSample {
                memory_usage: 96.0,
                ..HealthSample::default()
            },
            auto_fixable: true,
            resolved: resolved_at.is_some(),
            resolution_attempts: 1,
            resolution_timestamp: resolved_at,
        }
    }

    #[test]
    fn test_issue_round_trip_and_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = HealingStore::open_at(dir.path().join("healing.db")).unwrap();

        let mut i = issue("a", None);
        store.save_issue(&i).unwrap();
        i.resolution_attempts = 2;
        i.severity = Severity::Critical;
        store.save_issue(&i).unwrap();

        let active = store.active_issues().unwrap();
        assert_eq!(active, vec![i.clone()]);

        i.resolved = true;
        i.resolution_timestamp = Some(200.0);
        store.save_issue(&i).unwrap();
        assert!(store.active_issues().unwrap().is_empty());
        assert_eq!(store.resolved_count().unwrap(), 1);
    }

    #[test]
    fn test_prune_keeps_unresolved_issues() {
        let dir = tempfile::tempdir().unwrap();
        let store = HealingStore::open_at(dir.path().join("healing.db")).unwrap();
        store.save_issue(&issue("old-resolved", Some(10.0))).unwrap();
        store.save_issue(&issue("new-resolved", Some(500.0))).unwrap();
        store.save_issue(&issue("open", None)).unwrap();

        let counts = store.prune(100.0).unwrap();
        assert_eq!(counts.issues, 1);
        assert_eq!(store.resolved_count().unwrap(), 1);
        assert_eq!(store.active_issues().unwrap().len(), 1);
    }

    #[test]
    fn test_action_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = HealingStore::open_at(dir.path().join("healing.db")).unwrap();
        assert_eq!(store.action_counts().unwrap(), (0, 0));

        for (n, success) in [(1, true), (2, false), (3, true)] {
            store
                .record_action(&HealingActionRecord {
                    id: format!("act-{}", n),
                    timestamp: n as f64,
                    issue_id: "a".into(),
                    strategy: "reduce_animations".into(),
                    description: "Disable animations".into(),
                    success,
                    error: (!success).then(|| "hyprctl failed".to_string()),
                })
                .unwrap();
        }
        assert_eq!(store.action_counts().unwrap(), (3, 2));
        let recent = store.recent_actions(2).unwrap();
        assert_eq!(recent[0].id, "act-3");
        assert_eq!(recent.len(), 2);
    }
}
