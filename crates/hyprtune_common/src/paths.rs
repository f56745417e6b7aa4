//! Path helpers for hyprtune
//!
//! Everything lives under the XDG base directories of the invoking user.
//! `HYPRTUNE_HOME` relocates all of them under one root, which is how the
//! test suites and throwaway sessions keep state out of the real home.

use std::path::{Path, PathBuf};

/// Environment variable overriding every hyprtune directory
pub const HOME_ENV: &str = "HYPRTUNE_HOME";

/// systemd user unit managed by `hyprtunectl start|stop`
pub const SERVICE_NAME: &str = "hyprtuned.service";

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn fallback_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Directory holding databases, learned profiles and logs
pub fn data_dir() -> PathBuf {
    if let Some(root) = home_override() {
        return root.join("data");
    }
    dirs::data_dir()
        .unwrap_or_else(|| fallback_home().join(".local/share"))
        .join("hyprtune")
}

/// Directory holding `settings.json`
pub fn config_dir() -> PathBuf {
    if let Some(root) = home_override() {
        return root.join("config");
    }
    dirs::config_dir()
        .unwrap_or_else(|| fallback_home().join(".config"))
        .join("hyprtune")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Runtime directory for the socket and pid file
///
/// Priority:
/// 1. `$HYPRTUNE_HOME/run`
/// 2. `$XDG_RUNTIME_DIR`
/// 3. `/tmp/hyprtune-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Some(root) = home_override() {
        return root.join("run");
    }
    if let Some(dir) = dirs::runtime_dir() {
        return dir;
    }
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/hyprtune-{}", uid))
}

pub fn socket_path() -> PathBuf {
    runtime_dir().join("hyprtune.sock")
}

pub fn pid_file() -> PathBuf {
    runtime_dir().join("hyprtuned.pid")
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => fallback_home().join(rest),
        None => PathBuf::from(raw),
    }
}

/// On-disk layout of the daemon's state, rooted at one data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn from_env() -> Self {
        Self::at(data_dir())
    }

    pub fn at<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn healing_db(&self) -> PathBuf {
        self.root.join("healing.db")
    }

    pub fn adaptive_db(&self) -> PathBuf {
        self.root.join("adaptive.db")
    }

    pub fn optimizer_db(&self) -> PathBuf {
        self.root.join("optimizer.db")
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    pub fn model_file(&self) -> PathBuf {
        self.root.join("optimizer_model.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join("hyprtuned.log")
    }

    /// Files reported by `hyprtunectl stats`, in display order
    pub fn state_files(&self) -> Vec<PathBuf> {
        vec![
            self.healing_db(),
            self.adaptive_db(),
            self.optimizer_db(),
            self.profiles_file(),
            self.model_file(),
        ]
    }

    /// Create the data and log directories.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.log_dir())
    }
}
