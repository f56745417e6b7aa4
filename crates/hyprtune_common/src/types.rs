//! Records shared by the daemon loops, the stores and the CLI.

use crate::value::ConfigValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Issues
// ============================================================================

/// Issue severity, ordered low < medium < high < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub fn level(self) -> i64 {
        self as i64
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Severity::Low),
            2 => Some(Severity::Medium),
            3 => Some(Severity::High),
            4 => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Performance,
    Stability,
    Graphics,
    Audio,
    Input,
    Memory,
    Disk,
    Network,
    System,
}

impl IssueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Performance => "performance",
            IssueCategory::Stability => "stability",
            IssueCategory::Graphics => "graphics",
            IssueCategory::Audio => "audio",
            IssueCategory::Input => "input",
            IssueCategory::Memory => "memory",
            IssueCategory::Disk => "disk",
            IssueCategory::Network => "network",
            IssueCategory::System => "system",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "performance" => Ok(IssueCategory::Performance),
            "stability" => Ok(IssueCategory::Stability),
            "graphics" => Ok(IssueCategory::Graphics),
            "audio" => Ok(IssueCategory::Audio),
            "input" => Ok(IssueCategory::Input),
            "memory" => Ok(IssueCategory::Memory),
            "disk" => Ok(IssueCategory::Disk),
            "network" => Ok(IssueCategory::Network),
            "system" => Ok(IssueCategory::System),
            other => Err(format!("unknown issue category '{}'", other)),
        }
    }
}

/// The measurement an issue was raised on and is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMetric {
    Cpu,
    Memory,
    Disk,
    Temperature,
    Compositor,
}

impl TriggerMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMetric::Cpu => "cpu",
            TriggerMetric::Memory => "memory",
            TriggerMetric::Disk => "disk",
            TriggerMetric::Temperature => "temperature",
            TriggerMetric::Compositor => "compositor",
        }
    }
}

impl FromStr for TriggerMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(TriggerMetric::Cpu),
            "memory" => Ok(TriggerMetric::Memory),
            "disk" => Ok(TriggerMetric::Disk),
            "temperature" => Ok(TriggerMetric::Temperature),
            "compositor" => Ok(TriggerMetric::Compositor),
            other => Err(format!("unknown trigger metric '{}'", other)),
        }
    }
}

/// A detected threshold or trend violation tracked until it recovers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub detected_at: f64,
    pub category: IssueCategory,
    pub severity: Severity,
    /// Stable title; together with the category it identifies the issue
    pub title: String,
    pub description: String,
    pub symptoms: Vec<String>,
    pub potential_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub trigger: TriggerMetric,
    /// Snapshot of the sample the issue was raised on
    pub metrics: HealthSample,
    pub auto_fixable: bool,
    pub resolved: bool,
    pub resolution_attempts: u32,
    pub resolution_timestamp: Option<f64>,
}

/// One executed healing strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingActionRecord {
    pub id: String,
    pub timestamp: f64,
    pub issue_id: String,
    pub strategy: String,
    pub description: String,
    pub success: bool,
    pub error: Option<String>,
}

// ============================================================================
// Samples
// ============================================================================

/// Health snapshot taken by the self-healing loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub gpu_usage: f64,
    pub cpu_temperature: f64,
    pub gpu_temperature: f64,
    pub disk_usage: f64,
    pub network_latency_ms: f64,
    pub active_processes: u64,
    pub system_load: f64,
    pub active_windows: u32,
    pub workspace_count: u32,
    pub compositor_responsive: bool,
}

impl HealthSample {
    /// Hottest of the CPU and GPU readings
    pub fn max_temperature(&self) -> f64 {
        self.cpu_temperature.max(self.gpu_temperature)
    }
}

impl Default for HealthSample {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            gpu_usage: 0.0,
            cpu_temperature: 0.0,
            gpu_temperature: 0.0,
            disk_usage: 0.0,
            network_latency_ms: 0.0,
            active_processes: 0,
            system_load: 0.0,
            active_windows: 0,
            workspace_count: 0,
            compositor_responsive: true,
        }
    }
}

/// Snapshot taken by the optimizer loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSample {
    pub timestamp: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub gpu_usage: f64,
    pub gpu_memory: f64,
    /// Bytes read from block devices since the previous sample
    pub io_read: f64,
    pub io_write: f64,
    /// Bytes moved over non-loopback interfaces since the previous sample
    pub network_sent: f64,
    pub network_recv: f64,
    pub active_windows: u32,
    pub workspace_switches: u32,
    pub animation_fps: f64,
    pub power_consumption: f64,
    pub temperature: f64,
    pub battery_level: f64,
    pub user_activity_score: f64,
}

impl Default for OptimizerSample {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            gpu_usage: 0.0,
            gpu_memory: 0.0,
            io_read: 0.0,
            io_write: 0.0,
            network_sent: 0.0,
            network_recv: 0.0,
            active_windows: 0,
            workspace_switches: 0,
            animation_fps: 60.0,
            power_consumption: 0.0,
            temperature: 0.0,
            battery_level: 100.0,
            user_activity_score: 50.0,
        }
    }
}

// ============================================================================
// Adaptive configuration
// ============================================================================

/// Coarse classification of what the user is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLabel {
    Gaming,
    Development,
    Media,
    Multitasking,
    Work,
    Night,
    General,
}

impl ActivityLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityLabel::Gaming => "gaming",
            ActivityLabel::Development => "development",
            ActivityLabel::Media => "media",
            ActivityLabel::Multitasking => "multitasking",
            ActivityLabel::Work => "work",
            ActivityLabel::Night => "night",
            ActivityLabel::General => "general",
        }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaming" => Ok(ActivityLabel::Gaming),
            "development" => Ok(ActivityLabel::Development),
            "media" => Ok(ActivityLabel::Media),
            "multitasking" => Ok(ActivityLabel::Multitasking),
            "work" => Ok(ActivityLabel::Work),
            "night" => Ok(ActivityLabel::Night),
            "general" => Ok(ActivityLabel::General),
            other => Err(format!("unknown activity label '{}'", other)),
        }
    }
}

/// Context signature: activity label × four-hour block of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextBucket {
    pub activity: ActivityLabel,
    /// `hour / 4`, in 0..6
    pub hour_block: u32,
}

impl ContextBucket {
    pub fn new(activity: ActivityLabel, hour: u32) -> Self {
        Self {
            activity,
            hour_block: hour / 4,
        }
    }

    /// `{activity}_{hour_block}`, the key profiles are named after
    pub fn pattern_key(&self) -> String {
        format!("{}_{}", self.activity, self.hour_block)
    }
}

/// What the user is doing right now, captured every adaptive tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub timestamp: f64,
    pub hour_of_day: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub active_applications: Vec<String>,
    pub workspace_layout: String,
    pub window_count: u32,
    /// Backlight level in 0..1
    pub screen_brightness: f64,
    pub system_load: f64,
    pub battery_level: f64,
    pub is_gaming: bool,
    pub is_coding: bool,
    pub is_media: bool,
    pub activity: ActivityLabel,
}

impl UserContext {
    pub fn bucket(&self) -> ContextBucket {
        ContextBucket::new(self.activity, self.hour_of_day)
    }

    /// Numeric features used for context clustering
    pub fn features(&self) -> Vec<f64> {
        vec![
            self.hour_of_day as f64,
            self.day_of_week as f64,
            self.window_count as f64,
            self.screen_brightness,
            self.system_load,
            self.battery_level,
            bool_feature(self.is_gaming),
            bool_feature(self.is_coding),
            bool_feature(self.is_media),
        ]
    }
}

fn bool_feature(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Who made a configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    User,
    Heuristic,
    Adaptive,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSource::User => "user",
            ChangeSource::Heuristic => "heuristic",
            ChangeSource::Adaptive => "adaptive",
        }
    }
}

/// One logged configuration change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub timestamp: f64,
    pub key: String,
    pub old_value: Option<ConfigValue>,
    pub new_value: ConfigValue,
    pub source: ChangeSource,
    pub bucket: ContextBucket,
}

/// Learned preferences for one context bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_id: String,
    pub bucket: ContextBucket,
    pub preferred: BTreeMap<String, ConfigValue>,
    pub usage_frequency: u64,
    pub last_used: f64,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_levels() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        for s in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(Severity::from_level(s.level()), Some(s));
        }
        assert_eq!(Severity::from_level(9), None);
    }

    #[test]
    fn test_bucket_pattern_key() {
        let bucket = ContextBucket::new(ActivityLabel::Development, 14);
        assert_eq!(bucket.hour_block, 3);
        assert_eq!(bucket.pattern_key(), "development_3");
    }

    #[test]
    fn test_category_round_trips_through_text() {
        for c in [IssueCategory::Performance, IssueCategory::Memory, IssueCategory::Disk] {
            assert_eq!(c.as_str().parse::<IssueCategory>().unwrap(), c);
        }
        assert!("bogus".parse::<IssueCategory>().is_err());
    }

    #[test]
    fn test_default_sample_is_responsive() {
        assert!(HealthSample::default().compositor_responsive);
    }
}
