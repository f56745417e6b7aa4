//! Retention: after a prune no store keeps a row older than the cutoff.

use hyprtune_common::{ActivityLabel, HealthSample, OptimizerSample, UserContext};
use hyprtuned::store::{
    retention_cutoff, AdaptiveStore, HealingStore, OptimizerStore, HEALING_RETENTION_DAYS,
};
use std::collections::BTreeMap;

const DAY: f64 = 86_400.0;
const NOW: f64 = 1_750_000_000.0;

/// One row per day, from 40 days ago up to now
fn daily_timestamps() -> Vec<f64> {
    (0..=40).map(|d| NOW - d as f64 * DAY).collect()
}

fn context(ts: f64) -> UserContext {
    UserContext {
        timestamp: ts,
        hour_of_day: 9,
        day_of_week: 1,
        active_applications: vec!["firefox".to_string()],
        workspace_layout: "dwindle".to_string(),
        window_count: 3,
        screen_brightness: 0.5,
        system_load: 20.0,
        battery_level: 80.0,
        is_gaming: false,
        is_coding: false,
        is_media: false,
        activity: ActivityLabel::General,
    }
}

#[test]
fn healing_store_keeps_one_week() {
    let dir = tempfile::tempdir().unwrap();
    let store = HealingStore::open_at(dir.path().join("healing.db")).unwrap();
    for ts in daily_timestamps() {
        store
            .append_sample(&HealthSample {
                timestamp: ts,
                ..HealthSample::default()
            })
            .unwrap();
    }

    let cutoff = retention_cutoff(NOW, HEALING_RETENTION_DAYS);
    let counts = store.prune(cutoff).unwrap();
    let kept = store.sample_timestamps().unwrap();

    assert!(kept.iter().all(|ts| *ts >= cutoff));
    assert_eq!(kept.len(), 8);
    assert_eq!(counts.samples, 33);
}

#[test]
fn optimizer_store_honours_retention_days() {
    let dir = tempfile::tempdir().unwrap();
    let store = OptimizerStore::open_at(dir.path().join("optimizer.db")).unwrap();
    for ts in daily_timestamps() {
        store
            .append_sample(&OptimizerSample {
                timestamp: ts,
                ..OptimizerSample::default()
            })
            .unwrap();
    }
    store
        .record_optimization(NOW - 35.0 * DAY, &BTreeMap::new(), 0.5, 0, 0)
        .unwrap();
    store
        .record_optimization(NOW, &BTreeMap::new(), 0.5, 0, 0)
        .unwrap();

    let cutoff = retention_cutoff(NOW, 30);
    store.prune(cutoff).unwrap();

    let kept = store.sample_timestamps().unwrap();
    assert!(kept.iter().all(|ts| *ts >= cutoff));
    assert_eq!(kept.len(), 31);
    assert_eq!(store.optimization_count().unwrap(), 1);
    assert_eq!(store.last_optimization().unwrap(), Some(NOW));
}

#[test]
fn adaptive_store_honours_retention_days() {
    let dir = tempfile::tempdir().unwrap();
    let store = AdaptiveStore::open_at(dir.path().join("adaptive.db")).unwrap();
    for ts in daily_timestamps() {
        store.insert_context(&context(ts)).unwrap();
    }

    let cutoff = retention_cutoff(NOW, 14);
    let removed = store.prune(cutoff).unwrap();

    let kept = store.context_timestamps().unwrap();
    assert!(kept.iter().all(|ts| *ts >= cutoff));
    assert_eq!(kept.len(), 15);
    assert_eq!(removed, 26);
    assert_eq!(store.context_count().unwrap(), 15);
}
