//! Settings for hyprtune.
//!
//! Two views over one JSON file:
//! - `SettingsStore` edits the raw document through dotted keys
//!   (`self_healing.max_fix_attempts`) and writes back only what was set.
//! - `Settings` is the typed, defaulted view the daemon runs with.

use crate::error::TuneError;
use crate::value::ConfigValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// AI optimizer section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between optimizer ticks
    #[serde(default = "default_optimization_interval")]
    pub optimization_interval: u64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Start in conservative mode regardless of healing state
    #[serde(default)]
    pub conservative_mode: bool,
}

/// Adaptive configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between adaptive ticks
    #[serde(default = "default_learning_interval")]
    pub learning_interval: u64,

    /// Minimum profile confidence before values are pushed to the compositor
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// User changes needed before a learning pass
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

/// Self-healing section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between monitoring ticks
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval: u64,

    #[serde(default = "default_true")]
    pub auto_fix_enabled: bool,

    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,

    /// Destructive operations healing may perform
    /// (`terminate_process`, `drop_caches`, `enable_zswap`, `restart_audio`)
    #[serde(default = "default_allowed_actions")]
    pub allowed_actions: Vec<String>,
}

/// Process-wide section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_max_log_size")]
    pub max_log_size: String,

    #[serde(default = "default_retention_days")]
    pub data_retention_days: u32,

    /// Compositor config file watched for user edits
    #[serde(default = "default_hyprland_config")]
    pub hyprland_config: String,
}

/// Typed settings with install-time defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub ai_optimizer: OptimizerSettings,

    #[serde(default)]
    pub adaptive_config: AdaptiveSettings,

    #[serde(default)]
    pub self_healing: HealingSettings,

    #[serde(default)]
    pub system: SystemSettings,
}

fn default_true() -> bool {
    true
}

fn default_optimization_interval() -> u64 {
    30
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_learning_interval() -> u64 {
    60
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_min_samples() -> usize {
    10
}

fn default_monitoring_interval() -> u64 {
    30
}

fn default_max_fix_attempts() -> u32 {
    3
}

fn default_allowed_actions() -> Vec<String> {
    vec!["restart_audio".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_size() -> String {
    "100MB".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_hyprland_config() -> String {
    "~/.config/hypr/hyprland.conf".to_string()
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            optimization_interval: default_optimization_interval(),
            learning_rate: default_learning_rate(),
            conservative_mode: false,
        }
    }
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_interval: default_learning_interval(),
            confidence_threshold: default_confidence_threshold(),
            min_samples: default_min_samples(),
        }
    }
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            monitoring_interval: default_monitoring_interval(),
            auto_fix_enabled: true,
            max_fix_attempts: default_max_fix_attempts(),
            allowed_actions: default_allowed_actions(),
        }
    }
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_log_size: default_max_log_size(),
            data_retention_days: default_retention_days(),
            hyprland_config: default_hyprland_config(),
        }
    }
}

impl Settings {
    /// Load the typed view from a settings file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, TuneError> {
        SettingsStore::open(path)?.settings()
    }
}

/// Raw JSON settings document addressed by dotted keys
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    root: Map<String, Value>,
}

impl SettingsStore {
    /// Open a settings file. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TuneError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                root: Map::new(),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Self {
                path,
                root: Map::new(),
            });
        }

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(root) => Ok(Self { path, root }),
            _ => Err(TuneError::Settings(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
        }
    }

    /// A store pre-filled with the install defaults.
    pub fn with_defaults<P: AsRef<Path>>(path: P) -> Result<Self, TuneError> {
        let root = match serde_json::to_value(Settings::default())? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Look up a dotted key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a dotted key, creating intermediate sections as needed.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<(), TuneError> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(TuneError::Settings(format!("invalid key '{}'", key)));
        }

        let (leaf, sections) = parts
            .split_last()
            .ok_or_else(|| TuneError::Settings("empty key".to_string()))?;

        let mut current = &mut self.root;
        for section in sections {
            let entry = current
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => {
                    return Err(TuneError::Settings(format!(
                        "'{}' is a value, not a section",
                        section
                    )))
                }
            };
        }

        current.insert(leaf.to_string(), value.to_json());
        Ok(())
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn to_pretty_string(&self) -> Result<String, TuneError> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }

    /// Typed view with defaults filled in for missing keys.
    pub fn settings(&self) -> Result<Settings, TuneError> {
        serde_json::from_value(self.as_value())
            .map_err(|e| TuneError::Settings(format!("{}: {}", self.path.display(), e)))
    }

    /// Write the document back, replacing the file atomically.
    pub fn save(&self) -> Result<(), TuneError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_pretty_string()? + "\n")?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
