//! `hyprtunectl health`: local checks that need no running loops.

use crate::client::daemon_reachable;
use hyprtune_common::paths::DataLayout;
use std::path::{Path, PathBuf};

/// Share of checks that must pass
pub const PASS_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub checks: Vec<Check>,
}

impl HealthSummary {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn percent(&self) -> f64 {
        if self.checks.is_empty() {
            return 0.0;
        }
        self.passed() as f64 * 100.0 / self.checks.len() as f64
    }

    pub fn healthy(&self) -> bool {
        self.percent() >= PASS_PERCENT
    }
}

/// Where the checks look
#[derive(Debug, Clone)]
pub struct HealthTargets {
    pub socket_path: PathBuf,
    pub settings_path: PathBuf,
    pub layout: DataLayout,
}

fn on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

fn writable(dir: &Path) -> bool {
    let scratch = dir.join(".hyprtunectl-write-test");
    let ok = std::fs::write(&scratch, b"ok").is_ok();
    let _ = std::fs::remove_file(&scratch);
    ok
}

pub async fn run_checks(targets: &HealthTargets) -> HealthSummary {
    let daemon = daemon_reachable(&targets.socket_path).await;
    let settings = targets.settings_path.is_file();
    let log_dir = targets.layout.log_dir();
    let hyprctl = on_path("hyprctl");
    let data_writable = writable(targets.layout.root());

    HealthSummary {
        checks: vec![
            Check::new(
                "Daemon",
                daemon,
                if daemon { "responding" } else { "not responding" },
            ),
            Check::new(
                "Settings",
                settings,
                targets.settings_path.display().to_string(),
            ),
            Check::new(
                "Log directory",
                log_dir.is_dir(),
                log_dir.display().to_string(),
            ),
            Check::new(
                "Hyprland",
                hyprctl,
                if hyprctl { "hyprctl found" } else { "hyprctl not on PATH" },
            ),
            Check::new(
                "Data directory",
                data_writable,
                if data_writable { "writable" } else { "not writable" },
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_layout_without_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::at(dir.path().join("data"));
        layout.ensure().unwrap();
        let settings_path = dir.path().join("settings.json");
        std::fs::write(&settings_path, "{}").unwrap();

        let summary = run_checks(&HealthTargets {
            socket_path: dir.path().join("hyprtune.sock"),
            settings_path,
            layout,
        })
        .await;

        let failed: Vec<&str> = summary
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name)
            .collect();
        assert!(failed.contains(&"Daemon"));
        assert!(!failed.contains(&"Settings"));
        assert!(!failed.contains(&"Log directory"));
        assert!(!failed.contains(&"Data directory"));
    }

    #[test]
    fn test_threshold() {
        let check = |passed| Check::new("x", passed, "");
        let summary = HealthSummary {
            checks: vec![check(true), check(true), check(true), check(true), check(false)],
        };
        assert_eq!(summary.percent(), 80.0);
        assert!(summary.healthy());

        let summary = HealthSummary {
            checks: vec![check(true), check(true), check(true), check(false), check(false)],
        };
        assert!(!summary.healthy());
    }
}
