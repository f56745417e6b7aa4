//! Reports published by the loops and served over RPC.

use crate::types::{HealingActionRecord, IssueCategory, Severity, TriggerMetric, UserContext};
use crate::value::ConfigValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl OrchestratorState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestratorState::Stopped => "stopped",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Running => "running",
            OrchestratorState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Active issue as shown in reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub id: String,
    pub title: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub trigger: TriggerMetric,
    pub age_minutes: f64,
    pub resolution_attempts: u32,
}

/// Self-healing loop report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingReport {
    pub monitoring_active: bool,
    pub active_issues: Vec<IssueSummary>,
    pub resolved_issues: usize,
    pub total_actions: usize,
    pub recent_actions: Vec<HealingActionRecord>,
    pub critical_issues: usize,
    pub high_priority_issues: usize,
    /// Percentage of healing actions that succeeded
    pub success_rate: f64,
}

/// Adaptive configuration loop report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveReport {
    pub learning_active: bool,
    pub active_profile: Option<String>,
    pub total_profiles: usize,
    /// User plus adaptive changes seen since start
    pub config_changes: usize,
    pub user_changes: usize,
    pub adaptations_applied: usize,
    /// User changes waiting for the next learning pass
    pub pending_changes: usize,
    pub contexts_captured: u64,
    pub current_context: Option<UserContext>,
    pub top_patterns: Vec<String>,
    pub confidence_threshold: f64,
    pub context_clusters: Option<usize>,
    pub cluster_inertia: Option<f64>,
}

impl Default for AdaptiveReport {
    fn default() -> Self {
        Self {
            learning_active: false,
            active_profile: None,
            total_profiles: 0,
            config_changes: 0,
            user_changes: 0,
            adaptations_applied: 0,
            pending_changes: 0,
            contexts_captured: 0,
            current_context: None,
            top_patterns: Vec::new(),
            confidence_threshold: 0.7,
            context_clusters: None,
            cluster_inertia: None,
        }
    }
}

/// AI optimizer loop report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerReport {
    pub optimization_active: bool,
    pub samples: usize,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_gpu: f64,
    pub avg_temperature: f64,
    pub battery_level: f64,
    pub total_optimizations: usize,
    pub last_optimization: Option<f64>,
    pub current_config: BTreeMap<String, ConfigValue>,
    pub conservative_mode: bool,
    pub training_steps: u64,
    pub last_loss: Option<f64>,
    /// The predictor learns from placeholder targets; its scores carry no meaning
    pub model_exploratory: bool,
    pub recommendations: Vec<String>,
}

/// Counters aggregated by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_optimizations: usize,
    pub adaptive_changes: usize,
    pub healing_actions: usize,
}

/// Answer to the `status` RPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub timestamp: String,
    pub state: OrchestratorState,
    pub ai_optimizer_active: bool,
    pub adaptive_config_active: bool,
    pub self_healing_active: bool,
    pub total_optimizations: usize,
    pub active_issues: usize,
    pub system_health_score: f64,
    pub uptime_hours: f64,
    pub performance_score: f64,
    pub stability_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSection {
    pub state: OrchestratorState,
    pub uptime_hours: f64,
    pub statistics: Statistics,
}

/// Answer to the `report` RPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedReport {
    pub timestamp: String,
    pub orchestrator: OrchestratorSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_optimizer: Option<OptimizerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_config: Option<AdaptiveReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_healing: Option<HealingReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrchestratorState::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Running.can_transition_to(Running));
    }
}
