//! Self-healing loop
//!
//! Every tick: take a health sample, archive issues that recovered (running
//! the rollback of their last successful strategy), detect and deduplicate new
//! issues, then run at most one strategy per active, auto-fixable issue that
//! still has attempts left.

pub mod detect;
pub mod strategy;

use crate::applier::{ActionGuard, Compositor};
use crate::collector::Collector;
use crate::history::History;
use crate::scheduler::ScheduledTask;
use crate::store::{retention_cutoff, HealingStore, HEALING_RETENTION_DAYS, PRUNE_EVERY_SECS};
use anyhow::Result;
use async_trait::async_trait;
use detect::{Admission, IssueBook, Thresholds};
use hyprtune_common::settings::HealingSettings;
use hyprtune_common::{
    now_ts, HealingActionRecord, HealingReport, HealthSample, Issue, IssueSummary, Severity,
};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use strategy::{RemedyContext, Strategy};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Samples kept in memory for trend detection
pub const HISTORY_CAPACITY: usize = 1000;

/// Actions listed in the report
const RECENT_ACTIONS: usize = 10;

/// Work decided for one tick
#[derive(Debug, Default)]
pub struct HealingPlan {
    /// Rollbacks for issues that resolved this tick
    pub rollbacks: Vec<(String, &'static Strategy)>,
    /// Strategy to run per issue id
    pub fixes: Vec<(String, &'static Strategy)>,
}

pub struct HealingLoop {
    settings: HealingSettings,
    thresholds: Thresholds,
    collector: Collector,
    compositor: Compositor,
    guard: ActionGuard,
    store: HealingStore,
    history: History<HealthSample>,
    book: IssueBook,
    /// Last strategy that succeeded per active issue
    last_success: HashMap<String, &'static Strategy>,
    recent_actions: VecDeque<HealingActionRecord>,
    total_actions: usize,
    successful_actions: usize,
    resolved_issues: usize,
    last_prune: f64,
    report_tx: watch::Sender<HealingReport>,
}

impl HealingLoop {
    /// Build the loop, restoring unresolved issues and counters from the store.
    pub fn new(
        settings: HealingSettings,
        collector: Collector,
        compositor: Compositor,
        store: HealingStore,
    ) -> Result<Self> {
        let guard = ActionGuard::from_names(&settings.allowed_actions);
        let active = store.active_issues()?;
        if !active.is_empty() {
            info!("Restored {} active issue(s)", active.len());
        }
        let (total_actions, successful_actions) = store.action_counts()?;
        let resolved_issues = store.resolved_count()?;
        let recent_actions = store.recent_actions(RECENT_ACTIONS)?.into_iter().collect();

        let (report_tx, _) = watch::channel(HealingReport::default());
        let mut this = Self {
            settings,
            thresholds: Thresholds::default(),
            collector,
            compositor,
            guard,
            store,
            history: History::new(HISTORY_CAPACITY),
            book: IssueBook::new(active),
            last_success: HashMap::new(),
            recent_actions,
            total_actions,
            successful_actions,
            resolved_issues,
            last_prune: 0.0,
            report_tx,
        };
        this.publish();
        Ok(this)
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<HealingReport> {
        self.report_tx.subscribe()
    }

    pub fn active_issues(&self) -> &[Issue] {
        self.book.active()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Process one sample end to end.
    pub async fn observe(&mut self, sample: HealthSample) -> Result<()> {
        let plan = self.plan(sample);
        self.execute(plan).await;
        Ok(())
    }

    /// Bookkeeping for one sample: resolve, detect, admit, pick strategies.
    pub fn plan(&mut self, sample: HealthSample) -> HealingPlan {
        let now = sample.timestamp;
        self.history.push(sample.clone());
        if let Err(e) = self.store.append_sample(&sample) {
            warn!("Failed to store health sample: {:#}", e);
        }

        let mut plan = HealingPlan::default();

        for issue in self
            .book
            .resolve_recovered(&sample, &self.thresholds, now)
        {
            self.resolved_issues += 1;
            self.save_issue(&issue);
            if let Some(strategy) = self.last_success.remove(&issue.id) {
                if strategy.rollback.is_some() {
                    plan.rollbacks.push((issue.id.clone(), strategy));
                }
            }
        }

        for candidate in detect::detect(&sample, &self.history, &self.thresholds) {
            match self.book.admit(candidate) {
                Admission::New(issue) | Admission::Escalated(issue) => self.save_issue(&issue),
                Admission::Duplicate => {}
            }
        }

        if self.settings.auto_fix_enabled {
            for issue in self.book.active() {
                if !issue.auto_fixable || issue.resolution_attempts >= self.settings.max_fix_attempts {
                    continue;
                }
                match strategy::select(issue.category, &sample) {
                    Some(strategy) => plan.fixes.push((issue.id.clone(), strategy)),
                    None => debug!("No applicable strategy for {}", issue.title),
                }
            }
        }

        plan
    }

    async fn execute(&mut self, plan: HealingPlan) {
        let ctx = RemedyContext {
            compositor: &self.compositor,
            guard: &self.guard,
        };

        for (issue_id, strategy) in &plan.rollbacks {
            if let Some(rollback) = strategy.rollback {
                match strategy::execute(rollback, &ctx).await {
                    Ok(()) => info!("Rolled back {} for resolved issue {}", strategy.name, issue_id),
                    Err(e) => warn!("Rollback of {} failed: {}", strategy.name, e),
                }
            }
        }

        let mut outcomes = Vec::with_capacity(plan.fixes.len());
        for (issue_id, strategy) in plan.fixes {
            info!("Applying healing strategy {} for issue {}", strategy.name, issue_id);
            let result = strategy::execute(strategy.remedy, &ctx).await;
            outcomes.push((issue_id, strategy, result));
        }

        for (issue_id, strategy, result) in outcomes {
            let record = HealingActionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: now_ts(),
                issue_id: issue_id.clone(),
                strategy: strategy.name.to_string(),
                description: strategy.description.to_string(),
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            self.note_action(record);

            if result.is_ok() {
                self.last_success.insert(issue_id.clone(), strategy);
            }
            let updated = self.book.get_mut(&issue_id).map(|issue| {
                issue.resolution_attempts += 1;
                issue.clone()
            });
            if let Some(issue) = updated {
                if result.is_err() && issue.resolution_attempts >= self.settings.max_fix_attempts {
                    warn!(
                        "Giving up on {} after {} attempt(s)",
                        issue.title, issue.resolution_attempts
                    );
                }
                self.save_issue(&issue);
            }
        }

        self.maybe_prune();
        self.publish();
    }

    fn note_action(&mut self, record: HealingActionRecord) {
        if record.success {
            self.successful_actions += 1;
            info!("Healing action {} succeeded", record.strategy);
        } else {
            warn!(
                "Healing action {} failed: {}",
                record.strategy,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.total_actions += 1;

        if let Err(e) = self.store.record_action(&record) {
            warn!("Failed to store healing action: {:#}", e);
        }
        self.recent_actions.push_front(record);
        self.recent_actions.truncate(RECENT_ACTIONS);
    }

    fn save_issue(&self, issue: &Issue) {
        if let Err(e) = self.store.save_issue(issue) {
            warn!("Failed to store issue {}: {:#}", issue.id, e);
        }
    }

    fn maybe_prune(&mut self) {
        let now = now_ts();
        if now - self.last_prune < PRUNE_EVERY_SECS {
            return;
        }
        self.last_prune = now;
        match self
            .store
            .prune(retention_cutoff(now, HEALING_RETENTION_DAYS))
        {
            Ok(counts) => debug!("Pruned healing data: {:?}", counts),
            Err(e) => error!("Failed to prune healing data: {:#}", e),
        }
    }

    pub fn report(&self) -> HealingReport {
        let now = now_ts();
        let active_issues = self
            .book
            .active()
            .iter()
            .map(|i| IssueSummary {
                id: i.id.clone(),
                title: i.title.clone(),
                category: i.category,
                severity: i.severity,
                trigger: i.trigger,
                age_minutes: ((now - i.detected_at) / 60.0).max(0.0),
                resolution_attempts: i.resolution_attempts,
            })
            .collect();

        let success_rate = if self.total_actions == 0 {
            0.0
        } else {
            self.successful_actions as f64 / self.total_actions as f64 * 100.0
        };

        HealingReport {
            monitoring_active: true,
            active_issues,
            resolved_issues: self.resolved_issues,
            total_actions: self.total_actions,
            recent_actions: self.recent_actions.iter().cloned().collect(),
            critical_issues: self.book.count_with(Severity::Critical),
            high_priority_issues: self.book.count_with(Severity::High),
            success_rate,
        }
    }

    fn publish(&mut self) {
        let report = self.report();
        self.report_tx.send_replace(report);
    }
}

#[async_trait]
impl ScheduledTask for HealingLoop {
    type Observation = HealthSample;
    type Plan = HealingPlan;

    fn name(&self) -> &'static str {
        "self-healing"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.monitoring_interval.max(1))
    }

    async fn collect(&mut self) -> Result<HealthSample> {
        Ok(self.collector.collect_health(now_ts()).await)
    }

    async fn decide(&mut self, sample: HealthSample) -> Result<HealingPlan> {
        Ok(self.plan(sample))
    }

    async fn apply(&mut self, plan: HealingPlan) -> Result<()> {
        self.execute(plan).await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let mut report = self.report();
        report.monitoring_active = false;
        self.report_tx.send_replace(report);
    }
}
