//! Adaptive configuration loop
//!
//! Every tick captures the user's context and re-reads `hyprland.conf`.
//! Edits made by the user since the previous read are logged against the
//! current context bucket. Once enough edits are pending they are folded into
//! per-bucket profiles. A confident profile matching the current context is
//! then pushed to the compositor.

pub mod hyprconf;
pub mod kmeans;
pub mod learning;
pub mod profiles;

use crate::applier::Compositor;
use crate::collector::Collector;
use crate::scheduler::ScheduledTask;
use crate::store::{retention_cutoff, AdaptiveStore, PRUNE_EVERY_SECS};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use hyprconf::ConfigSnapshot;
use hyprtune_common::settings::AdaptiveSettings;
use hyprtune_common::{
    now_ts, AdaptiveReport, ChangeSource, ConfigChange, ConfigValue, ContextBucket, Profile,
    UserContext,
};
use kmeans::{KMeans, CLUSTER_WINDOW, MIN_CONTEXTS};
use profiles::ProfileFile;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Patterns listed in the report
const TOP_PATTERNS: usize = 5;

/// What one tick saw
#[derive(Debug, Clone)]
pub struct AdaptiveObservation {
    pub context: UserContext,
    /// `None` when the config file could not be read this tick
    pub config: Option<ConfigSnapshot>,
}

/// Profile chosen for the current context
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileApplication {
    pub profile_id: String,
    pub bucket: ContextBucket,
    pub values: Vec<(String, ConfigValue)>,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptivePlan {
    pub apply: Option<ProfileApplication>,
}

pub struct AdaptiveLoop {
    settings: AdaptiveSettings,
    config_path: PathBuf,
    retention_days: u32,
    collector: Collector,
    compositor: Compositor,
    store: AdaptiveStore,
    profile_file: ProfileFile,
    profiles: BTreeMap<String, Profile>,
    snapshot: Option<ConfigSnapshot>,
    pending: Vec<ConfigChange>,
    clusters: KMeans,
    current_context: Option<UserContext>,
    active_profile: Option<String>,
    user_changes: usize,
    adaptations_applied: usize,
    contexts_captured: u64,
    last_prune: f64,
    report_tx: watch::Sender<AdaptiveReport>,
}

impl AdaptiveLoop {
    pub fn new(
        settings: AdaptiveSettings,
        config_path: PathBuf,
        retention_days: u32,
        collector: Collector,
        compositor: Compositor,
        store: AdaptiveStore,
        profile_file: ProfileFile,
    ) -> Result<Self> {
        let profiles = profile_file.load();
        if !profiles.is_empty() {
            info!("Loaded {} preference profile(s)", profiles.len());
        }
        let user_changes = store.change_count(ChangeSource::User.as_str())? as usize;
        let adaptations_applied = store.change_count(ChangeSource::Adaptive.as_str())? as usize;
        let contexts_captured = store.context_count()?;

        let (report_tx, _) = watch::channel(AdaptiveReport::default());
        let mut this = Self {
            settings,
            config_path,
            retention_days,
            collector,
            compositor,
            store,
            profile_file,
            profiles,
            snapshot: None,
            pending: Vec::new(),
            clusters: KMeans::default(),
            current_context: None,
            active_profile: None,
            user_changes,
            adaptations_applied,
            contexts_captured,
            last_prune: 0.0,
            report_tx,
        };
        this.publish();
        Ok(this)
    }

    pub fn subscribe(&self) -> watch::Receiver<AdaptiveReport> {
        self.report_tx.subscribe()
    }

    pub fn profiles(&self) -> &BTreeMap<String, Profile> {
        &self.profiles
    }

    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    /// Process one observation end to end.
    pub async fn observe(&mut self, observation: AdaptiveObservation) -> Result<()> {
        let plan = self.plan(observation);
        self.execute(plan).await;
        Ok(())
    }

    pub fn plan(&mut self, observation: AdaptiveObservation) -> AdaptivePlan {
        let AdaptiveObservation { context, config } = observation;
        let now = context.timestamp;
        let bucket = context.bucket();

        match self.store.insert_context(&context) {
            Ok(_) => self.contexts_captured += 1,
            Err(e) => warn!("Failed to store user context: {:#}", e),
        }

        if let Some(config) = config {
            self.track_user_edits(config, &context);
        }

        if self.pending.len() >= self.settings.min_samples {
            self.learning_pass(now);
        }

        let mut plan = AdaptivePlan::default();
        if let Some(m) = learning::best_match(&self.profiles, &bucket) {
            let profile = m.profile;
            let already_active = self.active_profile.as_deref() == Some(profile.profile_id.as_str());
            if profile.confidence > self.settings.confidence_threshold && !already_active {
                debug!(
                    "Profile {} matches {} ({:?}, score {:.2})",
                    profile.profile_id,
                    bucket.pattern_key(),
                    m.kind,
                    m.score
                );
                plan.apply = Some(ProfileApplication {
                    profile_id: profile.profile_id.clone(),
                    bucket,
                    values: profile
                        .preferred
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                });
            }
        }

        self.current_context = Some(context);
        plan
    }

    /// Diff against the previous read; the first read only seeds the snapshot.
    fn track_user_edits(&mut self, config: ConfigSnapshot, context: &UserContext) {
        if let Some(previous) = &self.snapshot {
            for edit in hyprconf::diff(previous, &config) {
                let change = ConfigChange {
                    timestamp: context.timestamp,
                    key: edit.key,
                    old_value: edit.old,
                    new_value: edit.new,
                    source: ChangeSource::User,
                    bucket: context.bucket(),
                };
                info!(
                    "User changed {} to {} ({})",
                    change.key,
                    change.new_value,
                    change.bucket.pattern_key()
                );
                if let Err(e) = self.store.insert_change(&change) {
                    warn!("Failed to store config change: {:#}", e);
                }
                self.user_changes += 1;
                self.pending.push(change);
            }
        }
        self.snapshot = Some(config);
    }

    fn learning_pass(&mut self, now: f64) {
        let batch: Vec<ConfigChange> = self.pending.drain(..).collect();
        let touched = learning::learn(&mut self.profiles, &batch, now);
        info!(
            "Learned from {} change(s); {} profile(s) updated",
            batch.len(),
            touched.len()
        );

        match self.store.recent_context_features(CLUSTER_WINDOW) {
            Ok(features) if features.len() >= MIN_CONTEXTS => {
                self.clusters.fit(&features);
                if let Some(inertia) = self.clusters.inertia() {
                    debug!(
                        "Clustered {} contexts, inertia {:.2}",
                        features.len(),
                        inertia
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to load contexts for clustering: {:#}", e),
        }

        if !touched.is_empty() {
            self.save_profiles();
        }
    }

    async fn execute(&mut self, plan: AdaptivePlan) {
        if let Some(application) = plan.apply {
            self.apply_profile(application).await;
        }
        self.maybe_prune();
        self.publish();
    }

    async fn apply_profile(&mut self, application: ProfileApplication) {
        let outcome = self.compositor.apply_batch(&application.values).await;
        if outcome.applied.is_empty() {
            warn!(
                "Could not apply any value of profile {}",
                application.profile_id
            );
            return;
        }

        let now = now_ts();
        for (key, value) in &application.values {
            if !outcome.applied.contains(key) {
                continue;
            }
            let change = ConfigChange {
                timestamp: now,
                key: key.clone(),
                old_value: self.snapshot.as_ref().and_then(|s| s.get(key).cloned()),
                new_value: value.clone(),
                source: ChangeSource::Adaptive,
                bucket: application.bucket,
            };
            if let Err(e) = self.store.insert_change(&change) {
                warn!("Failed to store adaptive change: {:#}", e);
            }
        }
        self.adaptations_applied += outcome.applied.len();

        if let Some(profile) = self.profiles.get_mut(&application.profile_id) {
            profile.last_used = now;
        }
        info!(
            "Applied profile {} ({} value(s), {} failed)",
            application.profile_id,
            outcome.applied.len(),
            outcome.failed.len()
        );
        self.active_profile = Some(application.profile_id);
    }

    fn save_profiles(&self) {
        if let Err(e) = self.profile_file.save(&self.profiles) {
            error!("Failed to save profiles: {:#}", e);
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
            .prune(retention_cutoff(now, self.retention_days))
        {
            Ok(0) => {}
            Ok(n) => debug!("Pruned {} adaptive row(s)", n),
            Err(e) => error!("Failed to prune adaptive data: {:#}", e),
        }
    }

    pub fn report(&self) -> AdaptiveReport {
        let mut ranked: Vec<&Profile> = self.profiles.values().collect();
        ranked.sort_by(|a, b| b.usage_frequency.cmp(&a.usage_frequency));
        let top_patterns = ranked
            .into_iter()
            .take(TOP_PATTERNS)
            .map(|p| p.bucket.pattern_key())
            .collect();

        AdaptiveReport {
            learning_active: true,
            active_profile: self.active_profile.clone(),
            total_profiles: self.profiles.len(),
            config_changes: self.user_changes + self.adaptations_applied,
            user_changes: self.user_changes,
            adaptations_applied: self.adaptations_applied,
            pending_changes: self.pending.len(),
            contexts_captured: self.contexts_captured,
            current_context: self.current_context.clone(),
            top_patterns,
            confidence_threshold: self.settings.confidence_threshold,
            context_clusters: self.clusters.is_fitted().then(|| self.clusters.clusters()),
            cluster_inertia: self.clusters.inertia(),
        }
    }

    fn publish(&mut self) {
        let report = self.report();
        self.report_tx.send_replace(report);
    }
}

#[async_trait]
impl ScheduledTask for AdaptiveLoop {
    type Observation = AdaptiveObservation;
    type Plan = AdaptivePlan;

    fn name(&self) -> &'static str {
        "adaptive-config"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.learning_interval.max(1))
    }

    async fn collect(&mut self) -> Result<AdaptiveObservation> {
        let context = self.collector.capture_context(Local::now()).await;
        let config = match tokio::fs::read_to_string(&self.config_path).await {
            Ok(text) => Some(hyprconf::parse_config(&text)),
            Err(e) => {
                debug!("Cannot read {}: {}", self.config_path.display(), e);
                None
            }
        };
        Ok(AdaptiveObservation { context, config })
    }

    async fn decide(&mut self, observation: AdaptiveObservation) -> Result<AdaptivePlan> {
        Ok(self.plan(observation))
    }

    async fn apply(&mut self, plan: AdaptivePlan) -> Result<()> {
        self.execute(plan).await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.save_profiles();
        let mut report = self.report();
        report.learning_active = false;
        self.report_tx.send_replace(report);
    }
}
