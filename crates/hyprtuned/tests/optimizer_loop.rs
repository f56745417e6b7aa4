//! Optimizer loop driven with synthetic samples and a scripted compositor.

use hyprtune_common::settings::OptimizerSettings;
use hyprtune_common::{now_ts, ConfigValue, OptimizerSample};
use hyprtuned::applier::Compositor;
use hyprtuned::collector::Collector;
use hyprtuned::testing::ScriptedRunner;
use hyprtuned::optimizer::candidates::RANGES;
use hyprtuned::optimizer::OptimizerLoop;
use hyprtuned::scheduler::ScheduledTask;
use hyprtuned::store::OptimizerStore;
use std::sync::Arc;
use tempfile::TempDir;

fn optimizer(
    settings: OptimizerSettings,
    runner: Arc<ScriptedRunner>,
    dir: &TempDir,
) -> OptimizerLoop {
    OptimizerLoop::new(
        settings,
        30,
        Collector::new(runner.clone()),
        Compositor::new(runner),
        OptimizerStore::open_at(dir.path().join("optimizer.db")).unwrap(),
        dir.path().join("optimizer_model.json"),
    )
    .unwrap()
    .with_seed(7)
}

fn calm_sample() -> OptimizerSample {
    OptimizerSample {
        timestamp: now_ts(),
        cpu_usage: 25.0,
        memory_usage: 40.0,
        ..OptimizerSample::default()
    }
}

#[tokio::test]
async fn first_run_waits_for_ten_samples() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    let mut opt = optimizer(OptimizerSettings::default(), runner.clone(), &dir);

    for _ in 0..9 {
        opt.observe(calm_sample()).await.unwrap();
    }
    assert_eq!(runner.count("hyprctl keyword"), 0);

    opt.observe(calm_sample()).await.unwrap();
    assert_eq!(runner.count("hyprctl keyword"), RANGES.len());
    assert_eq!(opt.current_config().len(), RANGES.len());

    let report = opt.report();
    assert_eq!(report.total_optimizations, 1);
    assert!(report.last_optimization.is_some());
    assert!(report.model_exploratory);

    // Calm system, fresh optimization: nothing to do
    opt.observe(calm_sample()).await.unwrap();
    assert_eq!(opt.report().total_optimizations, 1);
}

#[tokio::test]
async fn forced_run_skips_the_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    let mut opt = optimizer(OptimizerSettings::default(), runner, &dir);
    let controls = opt.controls();

    // Requested before enough samples: kept until the tenth
    controls.request_run();
    for _ in 0..10 {
        opt.observe(calm_sample()).await.unwrap();
    }
    assert_eq!(opt.report().total_optimizations, 1);
    assert!(!controls.run_requested());

    controls.request_run();
    opt.observe(calm_sample()).await.unwrap();
    assert_eq!(opt.report().total_optimizations, 2);
    assert!(!controls.run_requested());
}

#[tokio::test]
async fn conservative_mode_turns_effects_off() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    let settings = OptimizerSettings {
        conservative_mode: true,
        ..OptimizerSettings::default()
    };
    let mut opt = optimizer(settings, runner, &dir);

    for _ in 0..10 {
        opt.observe(calm_sample()).await.unwrap();
    }

    let config = opt.current_config();
    for key in [
        "animations:enabled",
        "decoration:blur:enabled",
        "decoration:drop_shadow",
    ] {
        assert_eq!(config[key], ConfigValue::Bool(false));
    }
    match config["decoration:rounding"] {
        ConfigValue::Int(v) => assert!(v <= 10),
        ref other => panic!("unexpected rounding {:?}", other),
    }
    assert!(opt.report().conservative_mode);
}

#[tokio::test]
async fn history_and_model_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    {
        let mut opt = optimizer(OptimizerSettings::default(), runner.clone(), &dir);
        for _ in 0..10 {
            opt.observe(calm_sample()).await.unwrap();
        }
        let reports = opt.subscribe();
        assert!(reports.borrow().optimization_active);
        opt.shutdown().await;
        assert!(!reports.borrow().optimization_active);
    }
    assert!(dir.path().join("optimizer_model.json").exists());

    let opt = optimizer(OptimizerSettings::default(), runner, &dir);
    let report = opt.report();
    assert_eq!(report.total_optimizations, 1);
    assert!(report.last_optimization.is_some());
}
