//! Candidate configurations and their encoding for the predictor.

use hyprtune_common::{ConfigValue, OptimizerSample};
use rand::Rng;
use std::collections::BTreeMap;

/// Metric features per sample
pub const METRIC_FEATURES: usize = 16;

/// Network input width: metrics followed by one feature per tunable key
pub const INPUT_FEATURES: usize = METRIC_FEATURES + RANGES.len();

/// performance, battery impact, stability, user satisfaction
pub const OUTPUTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Visual effect; off in conservative mode
    Effect,
    /// Behaviour switch; left alone in conservative mode
    Switch,
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRange {
    pub key: &'static str,
    pub min: i64,
    pub max: i64,
    pub kind: RangeKind,
}

impl ConfigRange {
    const fn new(key: &'static str, min: i64, max: i64, kind: RangeKind) -> Self {
        Self { key, min, max, kind }
    }

    /// Position of `value` in the range, in 0..=1
    pub fn normalize(&self, value: i64) -> f64 {
        (value - self.min) as f64 / (self.max - self.min) as f64
    }

    /// Upper bound used in conservative mode
    pub fn conservative_max(&self) -> i64 {
        self.min + (self.max - self.min) / 2
    }

    pub fn to_value(&self, value: i64) -> ConfigValue {
        match self.kind {
            RangeKind::Effect | RangeKind::Switch => ConfigValue::Bool(value != 0),
            RangeKind::Numeric => ConfigValue::Int(value),
        }
    }

    /// Inverse of `to_value`; `None` for values outside the range.
    pub fn from_value(&self, value: &ConfigValue) -> Option<i64> {
        let v = value.as_f64()?.round() as i64;
        (self.min..=self.max).contains(&v).then_some(v)
    }
}

pub const RANGES: [ConfigRange; 11] = [
    ConfigRange::new("animations:enabled", 0, 1, RangeKind::Effect),
    ConfigRange::new("decoration:blur:enabled", 0, 1, RangeKind::Effect),
    ConfigRange::new("decoration:drop_shadow", 0, 1, RangeKind::Effect),
    ConfigRange::new("decoration:rounding", 0, 20, RangeKind::Numeric),
    ConfigRange::new("misc:vfr", 0, 1, RangeKind::Switch),
    ConfigRange::new("render:direct_scanout", 0, 1, RangeKind::Switch),
    ConfigRange::new("general:gaps_in", 0, 15, RangeKind::Numeric),
    ConfigRange::new("general:gaps_out", 0, 30, RangeKind::Numeric),
    ConfigRange::new("animations:bezier_steps", 1, 10, RangeKind::Numeric),
    ConfigRange::new("decoration:blur:size", 1, 10, RangeKind::Numeric),
    ConfigRange::new("decoration:blur:passes", 1, 4, RangeKind::Numeric),
];

/// One value per entry of `RANGES`, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate(pub Vec<i64>);

impl Candidate {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Candidate(
            RANGES
                .iter()
                .map(|r| rng.gen_range(r.min..=r.max))
                .collect(),
        )
    }

    /// Build from applied settings; keys without a usable value sit mid-range.
    pub fn from_settings(settings: &BTreeMap<String, ConfigValue>) -> Self {
        Candidate(
            RANGES
                .iter()
                .map(|r| {
                    settings
                        .get(r.key)
                        .and_then(|v| r.from_value(v))
                        .unwrap_or(r.min + (r.max - r.min) / 2)
                })
                .collect(),
        )
    }

    pub fn encode(&self) -> Vec<f64> {
        RANGES
            .iter()
            .zip(&self.0)
            .map(|(r, v)| r.normalize(*v))
            .collect()
    }

    /// Turn effects off, keep switches at their `current` values and clamp
    /// numeric keys to the lower half of their range.
    pub fn conservative(mut self, current: &BTreeMap<String, ConfigValue>) -> Self {
        for (r, v) in RANGES.iter().zip(self.0.iter_mut()) {
            match r.kind {
                RangeKind::Effect => *v = r.min,
                RangeKind::Switch => {
                    if let Some(cur) = current.get(r.key).and_then(|c| r.from_value(c)) {
                        *v = cur;
                    }
                }
                RangeKind::Numeric => *v = (*v).clamp(r.min, r.conservative_max()),
            }
        }
        self
    }

    pub fn to_settings(&self) -> BTreeMap<String, ConfigValue> {
        RANGES
            .iter()
            .zip(&self.0)
            .map(|(r, v)| (r.key.to_string(), r.to_value(*v)))
            .collect()
    }
}

/// Normalised metric features of one sample
pub fn encode_sample(s: &OptimizerSample) -> Vec<f64> {
    vec![
        s.cpu_usage / 100.0,
        s.memory_usage / 100.0,
        s.gpu_usage / 100.0,
        s.gpu_memory / 100.0,
        (s.io_read / 1e9).min(1.0),
        (s.io_write / 1e9).min(1.0),
        (s.network_sent / 1e9).min(1.0),
        (s.network_recv / 1e9).min(1.0),
        (s.active_windows as f64 / 20.0).min(1.0),
        (s.workspace_switches as f64 / 10.0).min(1.0),
        s.animation_fps / 60.0,
        (s.power_consumption / 100.0).min(1.0),
        (s.temperature / 80.0).min(1.0),
        s.battery_level / 100.0,
        s.user_activity_score / 100.0,
        s.timestamp.rem_euclid(86_400.0) / 86_400.0,
    ]
}

/// Full network input for a sample and a candidate
pub fn encode_input(sample: &OptimizerSample, candidate: &Candidate) -> Vec<f64> {
    let mut input = encode_sample(sample);
    input.extend(candidate.encode());
    input
}

/// How predicted outputs are combined into one score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub performance: f64,
    pub battery: f64,
    pub user_experience: f64,
    pub stability: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            performance: 0.4,
            battery: 0.2,
            user_experience: 0.3,
            stability: 0.1,
        }
    }
}

impl ObjectiveWeights {
    /// `prediction` is `[performance, battery impact, stability, satisfaction]`.
    pub fn score(&self, prediction: &[f64]) -> f64 {
        let [performance, battery_impact, stability, satisfaction] = match prediction {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => return 0.0,
        };
        performance * self.performance
            + (1.0 - battery_impact) * self.battery
            + satisfaction * self.user_experience
            + stability * self.stability
    }
}

/// Training target for the transition `prev -> curr`. Stability and
/// satisfaction are fixed placeholders.
pub fn training_target(prev: &OptimizerSample, curr: &OptimizerSample) -> Vec<f64> {
    let cpu_gain = (prev.cpu_usage - curr.cpu_usage) / 100.0;
    let battery_gain = (curr.battery_level - prev.battery_level) / 100.0;
    vec![
        (0.5 + cpu_gain / 2.0).clamp(0.0, 1.0),
        (0.5 - battery_gain / 2.0).clamp(0.0, 1.0),
        0.8,
        0.7,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_candidates_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let c = Candidate::random(&mut rng);
            for (r, v) in RANGES.iter().zip(&c.0) {
                assert!((r.min..=r.max).contains(v), "{} = {}", r.key, v);
            }
            assert!(c.encode().iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }

    #[test]
    fn test_input_width() {
        let mut rng = StdRng::seed_from_u64(2);
        let input = encode_input(&OptimizerSample::default(), &Candidate::random(&mut rng));
        assert_eq!(input.len(), INPUT_FEATURES);
        assert_eq!(INPUT_FEATURES, 27);
    }

    #[test]
    fn test_conservative_clamp() {
        let mut current = BTreeMap::new();
        current.insert("misc:vfr".to_string(), ConfigValue::Bool(true));
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let c = Candidate::random(&mut rng).conservative(&current);
            let settings = c.to_settings();
            assert_eq!(settings["animations:enabled"], ConfigValue::Bool(false));
            assert_eq!(settings["decoration:blur:enabled"], ConfigValue::Bool(false));
            assert_eq!(settings["decoration:drop_shadow"], ConfigValue::Bool(false));
            assert_eq!(settings["misc:vfr"], ConfigValue::Bool(true));
            for (r, v) in RANGES.iter().zip(&c.0) {
                if r.kind == RangeKind::Numeric {
                    assert!(*v <= r.conservative_max(), "{} = {}", r.key, v);
                }
            }
        }
    }

    #[test]
    fn test_settings_round_trip_through_candidate() {
        let mut rng = StdRng::seed_from_u64(4);
        let c = Candidate::random(&mut rng);
        assert_eq!(Candidate::from_settings(&c.to_settings()), c);
    }

    #[test]
    fn test_score_weights() {
        let w = ObjectiveWeights::default();
        assert_relative_eq!(w.score(&[1.0, 0.0, 1.0, 1.0]), 1.0, epsilon = 1e-12);
        assert_relative_eq!(w.score(&[0.0, 1.0, 0.0, 0.0]), 0.0);
        assert_relative_eq!(w.score(&[0.5, 0.5, 0.5, 0.5]), 0.5, epsilon = 1e-12);
        assert_eq!(w.score(&[1.0]), 0.0);
    }

    #[test]
    fn test_training_target_tracks_deltas() {
        let prev = OptimizerSample {
            cpu_usage: 80.0,
            battery_level: 50.0,
            ..OptimizerSample::default()
        };
        let curr = OptimizerSample {
            cpu_usage: 40.0,
            battery_level: 50.0,
            ..OptimizerSample::default()
        };
        let t = training_target(&prev, &curr);
        assert_relative_eq!(t[0], 0.7);
        assert_relative_eq!(t[1], 0.5);
        assert_eq!(&t[2..], &[0.8, 0.7]);
    }
}
