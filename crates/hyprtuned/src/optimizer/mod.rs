//! AI optimizer loop (exploratory)
//!
//! Samples richer metrics every tick. When resource use is high, or enough
//! time has passed, it scores random candidate configurations with a small
//! predictor network and applies the best one. The predictor is trained on
//! placeholder targets, so its choices are effectively random search; reports
//! say so through `model_exploratory`.

pub mod candidates;
pub mod nn;

use crate::applier::Compositor;
use crate::collector::Collector;
use crate::history::History;
use crate::scheduler::ScheduledTask;
use crate::state_file::{load_json, save_json};
use crate::store::{retention_cutoff, OptimizerStore, PRUNE_EVERY_SECS};
use anyhow::Result;
use async_trait::async_trait;
use candidates::{Candidate, ObjectiveWeights, INPUT_FEATURES, OUTPUTS};
use hyprtune_common::settings::OptimizerSettings;
use hyprtune_common::{now_ts, ConfigValue, OptimizerReport, OptimizerSample};
use nn::TinyNN;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const HISTORY_CAPACITY: usize = 10_000;

/// Samples needed before any optimization
pub const MIN_SAMPLES: usize = 10;

/// Samples averaged by `should_optimize`
const DECISION_WINDOW: usize = 10;

/// Samples summarized in the report
const REPORT_WINDOW: usize = 20;

pub const REOPTIMIZE_AFTER_SECS: f64 = 300.0;

const HIGH_CPU: f64 = 80.0;
const HIGH_MEMORY: f64 = 85.0;
const LOW_BATTERY: f64 = 20.0;

pub const CANDIDATES: usize = 100;

/// Samples needed before the predictor is trained
pub const TRAINING_WINDOW: usize = 50;

/// Model weights are saved every this many optimizations
const SAVE_MODEL_EVERY: usize = 10;

const LAYER_SIZES: [usize; 4] = [INPUT_FEATURES, 32, 16, OUTPUTS];

/// Flags other tasks may flip while the loop runs
#[derive(Debug, Clone, Default)]
pub struct OptimizerControls {
    conservative: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
}

impl OptimizerControls {
    pub fn set_conservative(&self, on: bool) {
        self.conservative.store(on, Ordering::Relaxed);
    }

    pub fn conservative(&self) -> bool {
        self.conservative.load(Ordering::Relaxed)
    }

    /// Ask for an optimization on the next tick that has enough samples.
    pub fn request_run(&self) {
        self.force.store(true, Ordering::Relaxed);
    }

    pub fn run_requested(&self) -> bool {
        self.force.load(Ordering::Relaxed)
    }

    fn take_request(&self) -> bool {
        self.force.swap(false, Ordering::Relaxed)
    }
}

/// Configuration picked for this tick
#[derive(Debug, Clone, Default)]
pub struct OptimizerPlan {
    pub candidate: Option<Candidate>,
    pub predicted_score: f64,
}

pub struct OptimizerLoop {
    settings: OptimizerSettings,
    retention_days: u32,
    collector: Collector,
    compositor: Compositor,
    store: OptimizerStore,
    model_path: PathBuf,
    model: TinyNN,
    weights: ObjectiveWeights,
    rng: StdRng,
    history: History<OptimizerSample>,
    controls: OptimizerControls,
    current_config: BTreeMap<String, ConfigValue>,
    total_optimizations: usize,
    last_optimization: Option<f64>,
    training_steps: u64,
    last_loss: Option<f64>,
    last_prune: f64,
    report_tx: watch::Sender<OptimizerReport>,
}

impl OptimizerLoop {
    pub fn new(
        settings: OptimizerSettings,
        retention_days: u32,
        collector: Collector,
        compositor: Compositor,
        store: OptimizerStore,
        model_path: PathBuf,
    ) -> Result<Self> {
        let mut rng = StdRng::from_entropy();
        let model = load_model(&model_path, settings.learning_rate)
            .unwrap_or_else(|| TinyNN::new(&LAYER_SIZES, settings.learning_rate, &mut rng));

        let total_optimizations = store.optimization_count()?;
        let last_optimization = store.last_optimization()?;

        let controls = OptimizerControls::default();
        let (report_tx, _) = watch::channel(OptimizerReport::default());
        let mut this = Self {
            settings,
            retention_days,
            collector,
            compositor,
            store,
            model_path,
            model,
            weights: ObjectiveWeights::default(),
            rng,
            history: History::new(HISTORY_CAPACITY),
            controls,
            current_config: BTreeMap::new(),
            total_optimizations,
            last_optimization,
            training_steps: 0,
            last_loss: None,
            last_prune: 0.0,
            report_tx,
        };
        this.publish();
        Ok(this)
    }

    /// Reseed candidate generation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn controls(&self) -> OptimizerControls {
        self.controls.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OptimizerReport> {
        self.report_tx.subscribe()
    }

    pub fn current_config(&self) -> &BTreeMap<String, ConfigValue> {
        &self.current_config
    }

    pub fn conservative(&self) -> bool {
        self.settings.conservative_mode || self.controls.conservative()
    }

    pub async fn observe(&mut self, sample: OptimizerSample) -> Result<()> {
        let plan = self.plan(sample);
        self.execute(plan).await;
        Ok(())
    }

    pub fn plan(&mut self, sample: OptimizerSample) -> OptimizerPlan {
        let now = sample.timestamp;
        if let Err(e) = self.store.append_sample(&sample) {
            warn!("Failed to store optimizer sample: {:#}", e);
        }
        self.history.push(sample);

        if self.history.len() < MIN_SAMPLES {
            return OptimizerPlan::default();
        }
        let forced = self.controls.take_request();
        if !self.should_optimize(now, forced) {
            return OptimizerPlan::default();
        }

        let (candidate, predicted_score) = self.search();
        debug!("Best candidate scores {:.3}", predicted_score);
        OptimizerPlan {
            candidate: Some(candidate),
            predicted_score,
        }
    }

    pub fn should_optimize(&self, now: f64, forced: bool) -> bool {
        if self.history.len() < MIN_SAMPLES {
            return false;
        }
        let (avg_cpu, avg_memory) = averages(self.history.tail(DECISION_WINDOW), |s| {
            (s.cpu_usage, s.memory_usage)
        });
        if avg_cpu > HIGH_CPU || avg_memory > HIGH_MEMORY {
            return true;
        }
        match self.last_optimization {
            None => true,
            Some(last) => forced || now - last >= REOPTIMIZE_AFTER_SECS,
        }
    }

    /// Score `CANDIDATES` random configurations against the latest sample.
    fn search(&mut self) -> (Candidate, f64) {
        let Some(latest) = self.history.last().cloned() else {
            return (Candidate::from_settings(&self.current_config), 0.0);
        };
        let conservative = self.conservative();

        let mut best: Option<(Candidate, f64)> = None;
        for _ in 0..CANDIDATES {
            let mut candidate = Candidate::random(&mut self.rng);
            if conservative {
                candidate = candidate.conservative(&self.current_config);
            }
            let prediction = self
                .model
                .predict(&candidates::encode_input(&latest, &candidate));
            let score = self.weights.score(&prediction);
            if best.as_ref().map_or(true, |(_, top)| score > *top) {
                best = Some((candidate, score));
            }
        }

        best.unwrap_or_else(|| (Candidate::from_settings(&self.current_config), 0.0))
    }

    async fn execute(&mut self, plan: OptimizerPlan) {
        if let Some(candidate) = plan.candidate {
            self.apply_candidate(candidate, plan.predicted_score).await;
        }
        self.train();
        self.maybe_prune();
        self.publish();
    }

    async fn apply_candidate(&mut self, candidate: Candidate, predicted_score: f64) {
        let settings = candidate.to_settings();
        let pairs: Vec<(String, ConfigValue)> = settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let outcome = self.compositor.apply_batch(&pairs).await;

        for key in &outcome.applied {
            if let Some(value) = settings.get(key) {
                self.current_config.insert(key.clone(), value.clone());
            }
        }

        let now = now_ts();
        if let Err(e) = self.store.record_optimization(
            now,
            &settings,
            predicted_score,
            outcome.applied.len(),
            outcome.failed.len(),
        ) {
            warn!("Failed to record optimization: {:#}", e);
        }
        self.last_optimization = Some(now);
        self.total_optimizations += 1;
        info!(
            "Optimization applied {} setting(s), {} failed{}",
            outcome.applied.len(),
            outcome.failed.len(),
            if self.conservative() { " (conservative)" } else { "" }
        );

        if self.total_optimizations % SAVE_MODEL_EVERY == 0 {
            self.save_model();
        }
    }

    /// One epoch over consecutive pairs of the last `TRAINING_WINDOW` samples.
    fn train(&mut self) {
        if self.history.len() < TRAINING_WINDOW {
            return;
        }
        let config = Candidate::from_settings(&self.current_config).encode();
        let window: Vec<&OptimizerSample> = self.history.tail(TRAINING_WINDOW).collect();
        let samples: Vec<(Vec<f64>, Vec<f64>)> = window
            .windows(2)
            .map(|pair| {
                let mut input = candidates::encode_sample(pair[0]);
                input.extend_from_slice(&config);
                (input, candidates::training_target(pair[0], pair[1]))
            })
            .collect();

        if let Some(loss) = self.model.train_epoch(&samples) {
            self.training_steps += samples.len() as u64;
            self.last_loss = Some(loss);
            debug!("Predictor trained on {} pair(s), loss {:.4}", samples.len(), loss);
        }
    }

    fn save_model(&self) {
        match save_json(&self.model_path, &self.model) {
            Ok(()) => debug!("Saved predictor to {}", self.model_path.display()),
            Err(e) => error!("Failed to save predictor: {:#}", e),
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
            Ok(n) => debug!("Pruned {} optimizer row(s)", n),
            Err(e) => error!("Failed to prune optimizer data: {:#}", e),
        }
    }

    pub fn report(&self) -> OptimizerReport {
        let recent: Vec<&OptimizerSample> = self.history.tail(REPORT_WINDOW).collect();
        let n = recent.len().max(1) as f64;
        let mean = |f: fn(&OptimizerSample) -> f64| recent.iter().map(|s| f(s)).sum::<f64>() / n;

        OptimizerReport {
            optimization_active: true,
            samples: self.history.len(),
            avg_cpu: mean(|s| s.cpu_usage),
            avg_memory: mean(|s| s.memory_usage),
            avg_gpu: mean(|s| s.gpu_usage),
            avg_temperature: mean(|s| s.temperature),
            battery_level: recent.last().map_or(0.0, |s| s.battery_level),
            total_optimizations: self.total_optimizations,
            last_optimization: self.last_optimization,
            current_config: self.current_config.clone(),
            conservative_mode: self.conservative(),
            training_steps: self.training_steps,
            last_loss: self.last_loss,
            model_exploratory: true,
            recommendations: recommendations(&recent),
        }
    }

    fn publish(&mut self) {
        let report = self.report();
        self.report_tx.send_replace(report);
    }
}

fn load_model(path: &std::path::Path, learning_rate: f64) -> Option<TinyNN> {
    match load_json::<TinyNN>(path) {
        Ok(Some(mut model)) => {
            if model.input_size() != INPUT_FEATURES || model.output_size() != OUTPUTS {
                warn!(
                    "Ignoring saved predictor with shape {}->{}",
                    model.input_size(),
                    model.output_size()
                );
                return None;
            }
            model.set_learning_rate(learning_rate);
            info!("Loaded predictor from {}", path.display());
            Some(model)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("{:#}. Starting with a fresh predictor.", e);
            None
        }
    }
}

fn averages<'a, I, F>(samples: I, pick: F) -> (f64, f64)
where
    I: Iterator<Item = &'a OptimizerSample>,
    F: Fn(&OptimizerSample) -> (f64, f64),
{
    let mut n = 0usize;
    let (mut a, mut b) = (0.0, 0.0);
    for s in samples {
        let (x, y) = pick(s);
        a += x;
        b += y;
        n += 1;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    (a / n as f64, b / n as f64)
}

/// Advice derived from recent averages
pub fn recommendations(recent: &[&OptimizerSample]) -> Vec<String> {
    if recent.is_empty() {
        return Vec::new();
    }
    let n = recent.len() as f64;
    let avg_cpu = recent.iter().map(|s| s.cpu_usage).sum::<f64>() / n;
    let avg_memory = recent.iter().map(|s| s.memory_usage).sum::<f64>() / n;
    let avg_battery = recent.iter().map(|s| s.battery_level).sum::<f64>() / n;

    let mut out = Vec::new();
    if avg_cpu > HIGH_CPU {
        out.push("High CPU usage detected - consider disabling animations".to_string());
    }
    if avg_memory > HIGH_MEMORY {
        out.push("High memory usage - consider reducing blur effects".to_string());
    }
    if avg_battery < LOW_BATTERY {
        out.push("Low battery - switching to power-saving mode".to_string());
    }
    out
}

#[async_trait]
impl ScheduledTask for OptimizerLoop {
    type Observation = OptimizerSample;
    type Plan = OptimizerPlan;

    fn name(&self) -> &'static str {
        "ai-optimizer"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.optimization_interval.max(1))
    }

    async fn collect(&mut self) -> Result<OptimizerSample> {
        Ok(self.collector.collect_optimizer_sample(now_ts()).await)
    }

    async fn decide(&mut self, sample: OptimizerSample) -> Result<OptimizerPlan> {
        Ok(self.plan(sample))
    }

    async fn apply(&mut self, plan: OptimizerPlan) -> Result<()> {
        self.execute(plan).await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.save_model();
        let mut report = self.report();
        report.optimization_active = false;
        self.report_tx.send_replace(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, battery: f64) -> OptimizerSample {
        OptimizerSample {
            cpu_usage: cpu,
            memory_usage: 30.0,
            battery_level: battery,
            ..OptimizerSample::default()
        }
    }

    #[test]
    fn test_recommendations() {
        let hot = sample(95.0, 10.0);
        let recs = recommendations(&[&hot, &hot]);
        assert_eq!(recs.len(), 2);
        assert!(recs[0].contains("CPU"));
        assert!(recs[1].contains("battery"));

        let calm = sample(20.0, 90.0);
        assert!(recommendations(&[&calm]).is_empty());
        assert!(recommendations(&[]).is_empty());
    }

    #[test]
    fn test_controls_are_shared() {
        let controls = OptimizerControls::default();
        let other = controls.clone();
        other.set_conservative(true);
        other.request_run();
        assert!(controls.conservative());
        assert!(controls.take_request());
        assert!(!controls.take_request());
    }
}
