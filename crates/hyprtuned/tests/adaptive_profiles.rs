//! Adaptive loop: user edits become profiles, confident profiles are applied.

use hyprtune_common::settings::AdaptiveSettings;
use hyprtune_common::{
    ActivityLabel, ChangeSource, ConfigChange, ConfigValue, ContextBucket, UserContext,
};
use hyprtuned::adaptive::hyprconf::parse_config;
use hyprtuned::adaptive::learning::{self, profile_id};
use hyprtuned::adaptive::profiles::ProfileFile;
use hyprtuned::adaptive::{AdaptiveLoop, AdaptiveObservation};
use hyprtuned::applier::Compositor;
use hyprtuned::collector::Collector;
use hyprtuned::testing::ScriptedRunner;
use hyprtuned::store::AdaptiveStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const ROUNDING_8: &str = "hyprctl keyword decoration:rounding 8";

/// Seed read followed by eight user edits; 8 is the majority value
const READS: [i64; 9] = [5, 8, 10, 8, 10, 8, 10, 8, 9];

fn gaming_context(ts: f64) -> UserContext {
    UserContext {
        timestamp: ts,
        hour_of_day: 21,
        day_of_week: 4,
        active_applications: vec!["steam".to_string()],
        workspace_layout: "dwindle".to_string(),
        window_count: 2,
        screen_brightness: 0.6,
        system_load: 40.0,
        battery_level: 100.0,
        is_gaming: true,
        is_coding: false,
        is_media: false,
        activity: ActivityLabel::Gaming,
    }
}

fn observation(ts: f64, rounding: i64) -> AdaptiveObservation {
    let text = format!("decoration {{\n    rounding = {}\n}}\n", rounding);
    AdaptiveObservation {
        context: gaming_context(ts),
        config: Some(parse_config(&text)),
    }
}

fn adaptive_loop(
    threshold: f64,
    runner: Arc<ScriptedRunner>,
    dir: &TempDir,
) -> (AdaptiveLoop, ProfileFile) {
    let settings = AdaptiveSettings {
        confidence_threshold: threshold,
        min_samples: 8,
        ..AdaptiveSettings::default()
    };
    let profiles = ProfileFile::new(dir.path().join("profiles.json"));
    let adaptive = AdaptiveLoop::new(
        settings,
        dir.path().join("hyprland.conf"),
        30,
        Collector::new(runner.clone()),
        Compositor::new(runner),
        AdaptiveStore::open_at(dir.path().join("adaptive.db")).unwrap(),
        ProfileFile::new(profiles.path()),
    )
    .unwrap();
    (adaptive, profiles)
}

fn user_change(key: &str, value: ConfigValue, bucket: ContextBucket) -> ConfigChange {
    ConfigChange {
        timestamp: 0.0,
        key: key.to_string(),
        old_value: None,
        new_value: value,
        source: ChangeSource::User,
        bucket,
    }
}

#[test]
fn majority_value_wins_and_confidence_saturates() {
    let bucket = ContextBucket::new(ActivityLabel::Development, 10);
    let batch = vec![
        user_change("general:gaps_in", ConfigValue::Int(4), bucket),
        user_change("general:gaps_in", ConfigValue::Int(4), bucket),
        user_change("general:gaps_in", ConfigValue::Int(8), bucket),
    ];

    let mut profiles = BTreeMap::new();
    let mut last_confidence = 0.0;
    for round in 0..5 {
        learning::learn(&mut profiles, &batch, round as f64);
        let profile = &profiles[&profile_id(&bucket)];
        assert_eq!(profile.preferred["general:gaps_in"], ConfigValue::Int(4));
        assert_eq!(profile.usage_frequency, 3 * (round + 1));
        assert!(profile.confidence >= last_confidence);
        assert!(profile.confidence <= 1.0);
        last_confidence = profile.confidence;
    }
    assert_eq!(last_confidence, 1.0);
}

#[tokio::test]
async fn learned_profile_is_applied_once() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (mut adaptive, profiles) = adaptive_loop(0.7, runner.clone(), &dir);

    for (i, rounding) in READS.into_iter().enumerate() {
        adaptive.observe(observation(i as f64, rounding)).await.unwrap();
    }

    let bucket = gaming_context(0.0).bucket();
    let id = profile_id(&bucket);
    assert_eq!(adaptive.pending_changes(), 0);
    assert_eq!(adaptive.active_profile(), Some(id.as_str()));
    assert_eq!(runner.count(ROUNDING_8), 1);

    let report = adaptive.report();
    assert_eq!(report.user_changes, 8);
    assert_eq!(report.adaptations_applied, 1);
    assert_eq!(report.total_profiles, 1);
    assert_eq!(report.top_patterns, vec![bucket.pattern_key()]);

    let saved = profiles.load();
    assert_eq!(saved[&id].preferred["decoration:rounding"], ConfigValue::Int(8));

    // Same context again: the profile is already active
    adaptive.observe(observation(9.0, 8)).await.unwrap();
    assert_eq!(runner.count(ROUNDING_8), 1);
}

#[tokio::test]
async fn low_confidence_profile_is_not_applied() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (mut adaptive, _) = adaptive_loop(0.9, runner.clone(), &dir);

    for (i, rounding) in READS.into_iter().enumerate() {
        adaptive.observe(observation(i as f64, rounding)).await.unwrap();
    }

    assert_eq!(adaptive.profiles().len(), 1);
    assert_eq!(adaptive.active_profile(), None);
    assert_eq!(runner.count("hyprctl keyword"), 0);
}

#[tokio::test]
async fn failed_application_leaves_no_active_profile() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::failing());
    let (mut adaptive, _) = adaptive_loop(0.7, runner.clone(), &dir);

    for (i, rounding) in READS.into_iter().enumerate() {
        adaptive.observe(observation(i as f64, rounding)).await.unwrap();
    }

    assert_eq!(runner.count(ROUNDING_8), 1);
    assert_eq!(adaptive.active_profile(), None);
    assert_eq!(adaptive.report().adaptations_applied, 0);
}

#[tokio::test]
async fn profiles_and_counters_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());
    {
        let (mut adaptive, _) = adaptive_loop(0.9, runner.clone(), &dir);
        for (i, rounding) in READS.into_iter().enumerate() {
            adaptive.observe(observation(i as f64, rounding)).await.unwrap();
        }
    }

    let (adaptive, _) = adaptive_loop(0.9, runner, &dir);
    let report = adaptive.report();
    assert_eq!(report.total_profiles, 1);
    assert_eq!(report.user_changes, 8);
    assert_eq!(report.contexts_captured, 9);
}
