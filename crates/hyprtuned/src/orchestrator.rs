//! Orchestrator
//!
//! Owns the daemon lifecycle and reads the loops' published reports. It never
//! touches loop state directly: reports arrive through `watch` channels and
//! the only levers are the optimizer's shared flags.

use crate::applier::{self, ActionGuard, Compositor};
use crate::optimizer::OptimizerControls;
use hyprtune_common::rpc::OptimizeAck;
use hyprtune_common::{
    AdaptiveReport, ConfigValue, DaemonStatus, DetailedReport, HealingReport, IssueSummary,
    OptimizerReport, OrchestratorSection, OrchestratorState, Severity, Statistics, TriggerMetric,
    TuneError,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(600);

/// Health scores below this are logged at warn
pub const HEALTH_WARN_BELOW: f64 = 70.0;

/// Something that can be asked to back off while issues are active
pub trait Throttle: Send + Sync {
    fn name(&self) -> &'static str;
    fn set_conservative(&self, on: bool);
}

impl Throttle for OptimizerControls {
    fn name(&self) -> &'static str {
        "ai-optimizer"
    }

    fn set_conservative(&self, on: bool) {
        OptimizerControls::set_conservative(self, on);
    }
}

/// What the orchestrator holds for a running optimizer
pub struct OptimizerHandle {
    pub reports: watch::Receiver<OptimizerReport>,
    pub controls: OptimizerControls,
}

pub struct Orchestrator {
    state: RwLock<OrchestratorState>,
    started_at: Instant,
    optimizer: Option<OptimizerHandle>,
    adaptive: Option<watch::Receiver<AdaptiveReport>>,
    healing: Option<watch::Receiver<HealingReport>>,
    throttles: Vec<Arc<dyn Throttle>>,
    compositor: Compositor,
    guard: ActionGuard,
    conservative: AtomicBool,
    /// Critical issues whose emergency sequence already ran
    escalated: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(compositor: Compositor, guard: ActionGuard) -> Self {
        Self {
            state: RwLock::new(OrchestratorState::Stopped),
            started_at: Instant::now(),
            optimizer: None,
            adaptive: None,
            healing: None,
            throttles: Vec::new(),
            compositor,
            guard,
            conservative: AtomicBool::new(false),
            escalated: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_optimizer(mut self, handle: OptimizerHandle) -> Self {
        self.throttles.push(Arc::new(handle.controls.clone()));
        self.optimizer = Some(handle);
        self
    }

    pub fn with_adaptive(mut self, reports: watch::Receiver<AdaptiveReport>) -> Self {
        self.adaptive = Some(reports);
        self
    }

    pub fn with_healing(mut self, reports: watch::Receiver<HealingReport>) -> Self {
        self.healing = Some(reports);
        self
    }

    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    pub async fn transition(&self, next: OrchestratorState) -> Result<(), TuneError> {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            return Err(TuneError::InvalidTransition {
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        info!("Orchestrator {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    fn optimizer_report(&self) -> Option<OptimizerReport> {
        self.optimizer.as_ref().map(|h| h.reports.borrow().clone())
    }

    fn adaptive_report(&self) -> Option<AdaptiveReport> {
        self.adaptive.as_ref().map(|rx| rx.borrow().clone())
    }

    fn healing_report(&self) -> Option<HealingReport> {
        self.healing.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn uptime_hours(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() / 3600.0
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            total_optimizations: self
                .optimizer_report()
                .map_or(0, |r| r.total_optimizations),
            adaptive_changes: self.adaptive_report().map_or(0, |r| r.config_changes),
            healing_actions: self.healing_report().map_or(0, |r| r.total_actions),
        }
    }

    /// Whether each loop is running: it says so in its last report and its
    /// task still holds the report sender.
    pub fn loops_active(&self) -> (bool, bool, bool) {
        let optimizer = self.optimizer.as_ref().map_or(false, |h| {
            sender_alive(&h.reports) && h.reports.borrow().optimization_active
        });
        let adaptive = self
            .adaptive
            .as_ref()
            .map_or(false, |rx| sender_alive(rx) && rx.borrow().learning_active);
        let healing = self
            .healing
            .as_ref()
            .map_or(false, |rx| sender_alive(rx) && rx.borrow().monitoring_active);
        (optimizer, adaptive, healing)
    }

    pub async fn status(&self) -> DaemonStatus {
        let optimizer = self.optimizer_report();
        let adaptive = self.adaptive_report();
        let healing = self.healing_report();
        let (optimizer_active, adaptive_active, healing_active) = self.loops_active();

        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            state: self.state().await,
            ai_optimizer_active: optimizer_active,
            adaptive_config_active: adaptive_active,
            self_healing_active: healing_active,
            total_optimizations: optimizer.as_ref().map_or(0, |r| r.total_optimizations),
            active_issues: healing.as_ref().map_or(0, |r| r.active_issues.len()),
            system_health_score: health_score(
                optimizer.as_ref(),
                adaptive.as_ref(),
                healing.as_ref(),
            ),
            uptime_hours: self.uptime_hours(),
            performance_score: performance_score(optimizer.as_ref()),
            stability_score: stability_score(healing.as_ref()),
        }
    }

    pub async fn detailed_report(&self) -> DetailedReport {
        DetailedReport {
            timestamp: chrono::Local::now().to_rfc3339(),
            orchestrator: OrchestratorSection {
                state: self.state().await,
                uptime_hours: self.uptime_hours(),
                statistics: self.statistics(),
            },
            ai_optimizer: self.optimizer_report(),
            adaptive_config: self.adaptive_report(),
            self_healing: self.healing_report(),
        }
    }

    /// Ask the optimizer for a run on its next tick.
    pub fn request_optimization(&self) -> OptimizeAck {
        match &self.optimizer {
            Some(handle) => {
                handle.controls.request_run();
                info!("Optimization requested");
                OptimizeAck {
                    accepted: true,
                    message: "Optimization scheduled for the next optimizer tick".to_string(),
                }
            }
            None => OptimizeAck {
                accepted: false,
                message: "AI optimizer is disabled".to_string(),
            },
        }
    }

    /// One health-monitor pass; returns the health score.
    pub async fn monitor_tick(&self) -> f64 {
        let optimizer = self.optimizer_report();
        let adaptive = self.adaptive_report();
        let healing = self.healing_report();

        let score = health_score(optimizer.as_ref(), adaptive.as_ref(), healing.as_ref());
        if score < HEALTH_WARN_BELOW {
            warn!("System health score is low: {:.1}", score);
        } else {
            debug!("System health score {:.1}", score);
        }

        if let Some(report) = &healing {
            self.coordinate(!report.active_issues.is_empty());
            self.escalate(&report.active_issues).await;
        }

        score
    }

    /// Conservative mode follows "any active healing issue".
    fn coordinate(&self, issues_active: bool) {
        let previous = self.conservative.swap(issues_active, Ordering::Relaxed);
        if previous == issues_active {
            return;
        }
        for throttle in &self.throttles {
            throttle.set_conservative(issues_active);
            info!(
                "{} conservative mode {}",
                throttle.name(),
                if issues_active { "on" } else { "off" }
            );
        }
    }

    async fn escalate(&self, active: &[IssueSummary]) {
        let mut escalated = self.escalated.lock().await;
        escalated.retain(|id| active.iter().any(|i| &i.id == id));

        for issue in active.iter().filter(|i| i.severity == Severity::Critical) {
            if !escalated.insert(issue.id.clone()) {
                continue;
            }
            error!("Critical issue: {} ({})", issue.title, issue.id);
            self.emergency(issue).await;
        }
    }

    async fn emergency(&self, issue: &IssueSummary) {
        match issue.trigger {
            TriggerMetric::Temperature => {
                let outcome = self.compositor.apply_batch(&emergency_cooling()).await;
                info!(
                    "Emergency cooling: {} applied, {} failed",
                    outcome.applied.len(),
                    outcome.failed.len()
                );
            }
            TriggerMetric::Memory => {
                if applier::drop_caches(self.compositor.runner().as_ref(), &self.guard).await {
                    info!("Emergency memory relief: caches dropped");
                }
            }
            TriggerMetric::Compositor => {
                error!("Compositor is not responding; leaving it to self-healing");
            }
            TriggerMetric::Cpu | TriggerMetric::Disk => {
                warn!("No emergency sequence for {}", issue.title);
            }
        }
    }

    /// Every `HEALTH_CHECK_INTERVAL` until shutdown.
    pub async fn run_health_monitor(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        every(HEALTH_CHECK_INTERVAL, shutdown, move || {
            let this = Arc::clone(&self);
            async move {
                this.monitor_tick().await;
            }
        })
        .await;
    }

    /// Logs a status line every `STATUS_REPORT_INTERVAL` until shutdown.
    pub async fn run_status_reporter(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        every(STATUS_REPORT_INTERVAL, shutdown, move || {
            let this = Arc::clone(&self);
            async move {
                let status = this.status().await;
                info!(
                    "Status: health {:.1}, performance {:.1}, stability {:.1}, {} optimization(s), {} active issue(s), up {:.1}h",
                    status.system_health_score,
                    status.performance_score,
                    status.stability_score,
                    status.total_optimizations,
                    status.active_issues,
                    status.uptime_hours
                );
            }
        })
        .await;
    }
}

/// A loop that ended or panicked has dropped its sender
fn sender_alive<T>(rx: &watch::Receiver<T>) -> bool {
    rx.has_changed().is_ok()
}

async fn every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => f().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn emergency_cooling() -> Vec<(String, ConfigValue)> {
    vec![
        ("animations:enabled".to_string(), ConfigValue::Bool(false)),
        ("decoration:blur:enabled".to_string(), ConfigValue::Bool(false)),
        ("decoration:drop_shadow".to_string(), ConfigValue::Bool(false)),
        ("misc:vfr".to_string(), ConfigValue::Bool(true)),
    ]
}

// ============================================================================
// Scores
// ============================================================================

pub fn optimizer_score(r: &OptimizerReport) -> f64 {
    let mut score = 80.0;
    if r.avg_cpu > 90.0 {
        score -= 20.0;
    }
    if r.avg_memory > 90.0 {
        score -= 20.0;
    }
    score
}

pub fn adaptive_score(r: &AdaptiveReport) -> f64 {
    if r.config_changes > 0 {
        90.0
    } else {
        80.0
    }
}

pub fn healing_score(r: &HealingReport) -> f64 {
    (90.0 - 15.0 * r.critical_issues as f64 - 10.0 * r.high_priority_issues as f64).max(0.0)
}

/// Mean of the sub-scores of enabled loops; 75 when none is enabled.
pub fn health_score(
    optimizer: Option<&OptimizerReport>,
    adaptive: Option<&AdaptiveReport>,
    healing: Option<&HealingReport>,
) -> f64 {
    let scores: Vec<f64> = [
        optimizer.map(optimizer_score),
        adaptive.map(adaptive_score),
        healing.map(healing_score),
    ]
    .into_iter()
    .flatten()
    .collect();

    if scores.is_empty() {
        75.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

pub fn performance_score(optimizer: Option<&OptimizerReport>) -> f64 {
    optimizer.map_or(75.0, |r| {
        (100.0 - (0.5 * r.avg_cpu + 0.3 * r.avg_memory)).max(0.0)
    })
}

pub fn stability_score(healing: Option<&HealingReport>) -> f64 {
    healing.map_or(85.0, |r| {
        (100.0 - (20.0 * r.critical_issues as f64 + 10.0 * r.high_priority_issues as f64))
            .max(0.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use hyprtune_common::IssueCategory;

    fn orchestrator(runner: Arc<ScriptedRunner>) -> Orchestrator {
        Orchestrator::new(Compositor::new(runner), ActionGuard::default())
    }

    fn critical(id: &str, trigger: TriggerMetric) -> IssueSummary {
        IssueSummary {
            id: id.to_string(),
            title: "High Temperature".to_string(),
            category: IssueCategory::System,
            severity: Severity::Critical,
            trigger,
            age_minutes: 0.0,
            resolution_attempts: 0,
        }
    }

    #[test]
    fn test_health_score_defaults_and_means() {
        assert_eq!(health_score(None, None, None), 75.0);

        let busy = OptimizerReport {
            avg_cpu: 95.0,
            avg_memory: 95.0,
            ..OptimizerReport::default()
        };
        assert_eq!(optimizer_score(&busy), 40.0);

        let adaptive = AdaptiveReport {
            config_changes: 3,
            ..AdaptiveReport::default()
        };
        let healing = HealingReport {
            critical_issues: 1,
            high_priority_issues: 2,
            ..HealingReport::default()
        };
        assert_eq!(healing_score(&healing), 55.0);
        assert_eq!(
            health_score(Some(&busy), Some(&adaptive), Some(&healing)),
            (40.0 + 90.0 + 55.0) / 3.0
        );
    }

    #[test]
    fn test_component_scores() {
        assert_eq!(performance_score(None), 75.0);
        assert_eq!(stability_score(None), 85.0);

        let r = OptimizerReport {
            avg_cpu: 40.0,
            avg_memory: 50.0,
            ..OptimizerReport::default()
        };
        assert_eq!(performance_score(Some(&r)), 65.0);

        let h = HealingReport {
            critical_issues: 6,
            ..HealingReport::default()
        };
        assert_eq!(stability_score(Some(&h)), 0.0);
        assert_eq!(healing_score(&h), 0.0);
    }

    #[tokio::test]
    async fn test_lifecycle_rejects_invalid_transitions() {
        let o = orchestrator(Arc::new(ScriptedRunner::succeeding()));
        assert!(o.transition(OrchestratorState::Running).await.is_err());
        o.transition(OrchestratorState::Starting).await.unwrap();
        o.transition(OrchestratorState::Running).await.unwrap();
        assert!(matches!(
            o.transition(OrchestratorState::Starting).await,
            Err(TuneError::InvalidTransition { .. })
        ));
        assert_eq!(o.state().await, OrchestratorState::Running);
    }

    #[tokio::test]
    async fn test_conservative_mode_follows_active_issues() {
        let (tx, rx) = watch::channel(HealingReport::default());
        let (_opt_tx, opt_rx) = watch::channel(OptimizerReport::default());
        let controls = OptimizerControls::default();
        let o = orchestrator(Arc::new(ScriptedRunner::succeeding()))
            .with_healing(rx)
            .with_optimizer(OptimizerHandle {
                reports: opt_rx,
                controls: controls.clone(),
            });

        o.monitor_tick().await;
        assert!(!controls.conservative());

        let mut issue = critical("a", TriggerMetric::Cpu);
        issue.severity = Severity::High;
        tx.send_replace(HealingReport {
            active_issues: vec![issue],
            ..HealingReport::default()
        });
        o.monitor_tick().await;
        assert!(controls.conservative());

        tx.send_replace(HealingReport::default());
        o.monitor_tick().await;
        assert!(!controls.conservative());
    }

    #[tokio::test]
    async fn test_emergency_runs_once_per_issue() {
        let runner = Arc::new(ScriptedRunner::succeeding());
        let (tx, rx) = watch::channel(HealingReport::default());
        let o = orchestrator(runner.clone()).with_healing(rx);

        tx.send_replace(HealingReport {
            active_issues: vec![critical("hot-1", TriggerMetric::Temperature)],
            critical_issues: 1,
            ..HealingReport::default()
        });
        o.monitor_tick().await;
        o.monitor_tick().await;
        assert_eq!(runner.count("hyprctl keyword animations:enabled no"), 1);
        assert_eq!(runner.count("hyprctl keyword misc:vfr yes"), 1);

        tx.send_replace(HealingReport {
            active_issues: vec![critical("hot-2", TriggerMetric::Temperature)],
            critical_issues: 1,
            ..HealingReport::default()
        });
        o.monitor_tick().await;
        assert_eq!(runner.count("hyprctl keyword animations:enabled no"), 2);
    }

    #[tokio::test]
    async fn test_memory_emergency_respects_guard() {
        let runner = Arc::new(ScriptedRunner::succeeding());
        let (tx, rx) = watch::channel(HealingReport::default());
        let o = orchestrator(runner.clone()).with_healing(rx);

        tx.send_replace(HealingReport {
            active_issues: vec![critical("mem-1", TriggerMetric::Memory)],
            ..HealingReport::default()
        });
        o.monitor_tick().await;
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_loop_activity_follows_reports_and_senders() {
        let (opt_tx, opt_rx) = watch::channel(OptimizerReport::default());
        let (heal_tx, heal_rx) = watch::channel(HealingReport::default());
        let o = orchestrator(Arc::new(ScriptedRunner::succeeding()))
            .with_optimizer(OptimizerHandle {
                reports: opt_rx,
                controls: OptimizerControls::default(),
            })
            .with_healing(heal_rx);

        // Registered but nothing published yet
        let status = o.status().await;
        assert!(!status.ai_optimizer_active);
        assert!(!status.self_healing_active);
        assert!(!status.adaptive_config_active);

        opt_tx.send_replace(OptimizerReport {
            optimization_active: true,
            ..OptimizerReport::default()
        });
        heal_tx.send_replace(HealingReport {
            monitoring_active: true,
            ..HealingReport::default()
        });
        assert_eq!(o.loops_active(), (true, false, true));

        // The optimizer task is gone without a final report
        drop(opt_tx);
        let status = o.status().await;
        assert!(!status.ai_optimizer_active);
        assert!(status.self_healing_active);
    }

    #[test]
    fn test_optimize_request_without_optimizer() {
        let o = orchestrator(Arc::new(ScriptedRunner::succeeding()));
        assert!(!o.request_optimization().accepted);
    }
}
