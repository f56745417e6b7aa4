//! Configuration applier
//!
//! Pushes values to the compositor one `hyprctl keyword` call at a time and
//! gates destructive system operations behind the `allowed_actions` list.
//! A failed keyword call is logged and skipped; earlier calls in the same
//! batch are never rolled back.

use crate::exec::{CommandRunner, DEFAULT_TIMEOUT};
use hyprtune_common::ConfigValue;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a batch of keyword calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchOutcome {
    pub fn all_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handle on the compositor's control CLI
#[derive(Clone)]
pub struct Compositor {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Compositor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// `hyprctl keyword <key> <value>`; false on any failure.
    pub async fn keyword(&self, key: &str, value: &ConfigValue) -> bool {
        self.keyword_raw(key, &value.to_hyprctl_arg()).await
    }

    pub async fn keyword_raw(&self, key: &str, arg: &str) -> bool {
        match self
            .runner
            .run("hyprctl", &["keyword", key, arg], self.timeout)
            .await
        {
            Ok(out) if out.success() => {
                debug!("hyprctl keyword {} {}", key, arg);
                true
            }
            Ok(out) => {
                warn!(
                    "hyprctl keyword {} {} failed ({:?}): {}",
                    key,
                    arg,
                    out.status,
                    out.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("hyprctl keyword {} {} failed: {}", key, arg, e);
                false
            }
        }
    }

    /// Apply every pair independently.
    pub async fn apply_batch(&self, values: &[(String, ConfigValue)]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (key, value) in values {
            if self.keyword(key, value).await {
                outcome.applied.push(key.clone());
            } else {
                outcome.failed.push(key.clone());
            }
        }
        outcome
    }

    /// `hyprctl reload`
    pub async fn reload(&self) -> bool {
        match self.runner.run("hyprctl", &["reload"], self.timeout).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                warn!("hyprctl reload failed ({:?})", out.status);
                false
            }
            Err(e) => {
                warn!("hyprctl reload failed: {}", e);
                false
            }
        }
    }
}

/// Operations healing may only perform when explicitly allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestructiveAction {
    TerminateProcess,
    DropCaches,
    EnableZswap,
    RestartAudio,
}

impl DestructiveAction {
    pub const ALL: [DestructiveAction; 4] = [
        DestructiveAction::TerminateProcess,
        DestructiveAction::DropCaches,
        DestructiveAction::EnableZswap,
        DestructiveAction::RestartAudio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DestructiveAction::TerminateProcess => "terminate_process",
            DestructiveAction::DropCaches => "drop_caches",
            DestructiveAction::EnableZswap => "enable_zswap",
            DestructiveAction::RestartAudio => "restart_audio",
        }
    }
}

impl fmt::Display for DestructiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestructiveAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DestructiveAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown destructive action '{}'", s))
    }
}

/// Allow-list for destructive operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionGuard {
    allowed: HashSet<DestructiveAction>,
}

impl ActionGuard {
    /// Build from `self_healing.allowed_actions`; unknown names are logged and ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut allowed = HashSet::new();
        for name in names {
            match name.as_ref().parse::<DestructiveAction>() {
                Ok(action) => {
                    allowed.insert(action);
                }
                Err(e) => warn!("Ignoring allowed_actions entry: {}", e),
            }
        }
        Self { allowed }
    }

    pub fn allowing(actions: &[DestructiveAction]) -> Self {
        Self {
            allowed: actions.iter().copied().collect(),
        }
    }

    pub fn permits(&self, action: DestructiveAction) -> bool {
        self.allowed.contains(&action)
    }
}

/// Flush dirty pages and drop the page cache. Returns false when not
/// permitted or when either step fails.
pub async fn drop_caches(runner: &dyn CommandRunner, guard: &ActionGuard) -> bool {
    if !guard.permits(DestructiveAction::DropCaches) {
        info!("drop_caches not in allowed_actions; skipping");
        return false;
    }

    let steps: [(&str, &[&str]); 2] = [
        ("sync", &[]),
        ("sudo", &["-n", "sh", "-c", "echo 3 > /proc/sys/vm/drop_caches"]),
    ];
    for (program, args) in steps {
        match runner.run(program, args, DEFAULT_TIMEOUT).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                warn!("{} exited with {:?} while dropping caches", program, out.status);
                return false;
            }
            Err(e) => {
                warn!("Dropping caches failed: {}", e);
                return false;
            }
        }
    }
    info!("Dropped page caches");
    true
}
