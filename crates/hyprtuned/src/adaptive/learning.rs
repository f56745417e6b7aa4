//! Preference learning
//!
//! A learning pass groups a batch of user changes by context bucket, takes the
//! majority value per key inside each bucket that saw enough changes, and
//! merges the result into that bucket's profile.

use hyprtune_common::{ConfigChange, ConfigValue, ContextBucket, Profile};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Changes a bucket needs within one batch before it is learned from
pub const MIN_BUCKET_CHANGES: usize = 3;

/// Usage count at which confidence saturates
pub const CONFIDENCE_SATURATION: f64 = 10.0;

/// Best match must score strictly above this
pub const MIN_MATCH_SCORE: f64 = 0.5;

/// Weight given to a same-activity profile from another time block
pub const PARTIAL_MATCH_WEIGHT: f64 = 0.7;

/// Stable short id for a bucket's profile
pub fn profile_id(bucket: &ContextBucket) -> String {
    let digest = Sha256::digest(bucket.pattern_key().as_bytes());
    hex::encode(digest)[..8].to_string()
}

pub fn confidence_for(usage_frequency: u64) -> f64 {
    (usage_frequency as f64 / CONFIDENCE_SATURATION).min(1.0)
}

/// Most frequent value; ties go to the value seen first.
pub fn majority<'a, I>(values: I) -> Option<ConfigValue>
where
    I: IntoIterator<Item = &'a ConfigValue>,
{
    let mut counts: Vec<(&ConfigValue, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&ConfigValue, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((value, n));
        }
    }
    best.map(|(v, _)| v.clone())
}

/// Group changes by bucket, keeping first-seen order.
fn group_by_bucket(batch: &[ConfigChange]) -> Vec<(ContextBucket, Vec<&ConfigChange>)> {
    let mut groups: Vec<(ContextBucket, Vec<&ConfigChange>)> = Vec::new();
    for change in batch {
        match groups.iter_mut().find(|(b, _)| *b == change.bucket) {
            Some((_, changes)) => changes.push(change),
            None => groups.push((change.bucket, vec![change])),
        }
    }
    groups
}

/// Fold one batch of user changes into `profiles`. Returns the ids of the
/// profiles that were created or updated.
pub fn learn(
    profiles: &mut BTreeMap<String, Profile>,
    batch: &[ConfigChange],
    now: f64,
) -> Vec<String> {
    let mut touched = Vec::new();

    for (bucket, changes) in group_by_bucket(batch) {
        if changes.len() < MIN_BUCKET_CHANGES {
            continue;
        }

        let mut keys: Vec<&str> = Vec::new();
        for change in &changes {
            if !keys.contains(&change.key.as_str()) {
                keys.push(&change.key);
            }
        }

        let mut preferred = BTreeMap::new();
        for key in keys {
            let values = changes
                .iter()
                .filter(|c| c.key == key)
                .map(|c| &c.new_value);
            if let Some(value) = majority(values) {
                preferred.insert(key.to_string(), value);
            }
        }

        let id = profile_id(&bucket);
        let observed = changes.len() as u64;
        let profile = profiles.entry(id.clone()).or_insert_with(|| Profile {
            profile_id: id.clone(),
            bucket,
            preferred: BTreeMap::new(),
            usage_frequency: 0,
            last_used: now,
            confidence: 0.0,
        });
        profile.preferred.extend(preferred);
        profile.usage_frequency += observed;
        profile.last_used = now;
        profile.confidence = confidence_for(profile.usage_frequency);

        touched.push(id);
    }

    touched
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    /// Same activity, different time block
    Partial,
    /// Same activity and time block
    Exact,
}

#[derive(Debug, Clone, Copy)]
pub struct ProfileMatch<'a> {
    pub profile: &'a Profile,
    pub kind: MatchKind,
    pub score: f64,
}

pub fn match_score(profile: &Profile, bucket: &ContextBucket) -> Option<(MatchKind, f64)> {
    if profile.bucket == *bucket {
        Some((
            MatchKind::Exact,
            profile.confidence * profile.usage_frequency as f64 / CONFIDENCE_SATURATION,
        ))
    } else if profile.bucket.activity == bucket.activity {
        Some((MatchKind::Partial, profile.confidence * PARTIAL_MATCH_WEIGHT))
    } else {
        None
    }
}

/// Best profile for `bucket`. Candidates scoring at or below
/// `MIN_MATCH_SCORE` are ignored; among the rest an exact match beats any
/// partial one, then the higher score wins.
pub fn best_match<'a>(
    profiles: &'a BTreeMap<String, Profile>,
    bucket: &ContextBucket,
) -> Option<ProfileMatch<'a>> {
    let mut best: Option<ProfileMatch<'a>> = None;

    for profile in profiles.values() {
        let Some((kind, score)) = match_score(profile, bucket) else {
            continue;
        };
        if score <= MIN_MATCH_SCORE {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => (kind, score) > (current.kind, current.score),
        };
        if better {
            best = Some(ProfileMatch {
                profile,
                kind,
                score,
            });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyprtune_common::{ActivityLabel, ChangeSource};

    fn change(bucket: ContextBucket, key: &str, value: ConfigValue) -> ConfigChange {
        ConfigChange {
            timestamp: 0.0,
            key: key.to_string(),
            old_value: None,
            new_value: value,
            source: ChangeSource::User,
            bucket,
        }
    }

    fn profile(bucket: ContextBucket, usage_frequency: u64) -> Profile {
        Profile {
            profile_id: profile_id(&bucket),
            bucket,
            preferred: BTreeMap::new(),
            usage_frequency,
            last_used: 0.0,
            confidence: confidence_for(usage_frequency),
        }
    }

    #[test]
    fn test_majority_ties_go_to_first_seen() {
        let a = ConfigValue::Int(1);
        let b = ConfigValue::Int(2);
        assert_eq!(majority([&a, &b, &a]), Some(a.clone()));
        assert_eq!(majority([&b, &a]), Some(b.clone()));
        assert_eq!(majority([&a, &b, &b, &a]), Some(a.clone()));
        assert_eq!(majority(std::iter::empty()), None);
    }

    #[test]
    fn test_profile_id_is_stable() {
        let bucket = ContextBucket::new(ActivityLabel::Gaming, 21);
        assert_eq!(profile_id(&bucket), profile_id(&bucket));
        assert_eq!(profile_id(&bucket).len(), 8);
        assert_ne!(
            profile_id(&bucket),
            profile_id(&ContextBucket::new(ActivityLabel::Gaming, 3))
        );
    }

    #[test]
    fn test_small_buckets_are_not_learned() {
        let bucket = ContextBucket::new(ActivityLabel::Work, 10);
        let batch = vec![
            change(bucket, "decoration:rounding", ConfigValue::Int(4)),
            change(bucket, "decoration:rounding", ConfigValue::Int(4)),
        ];
        let mut profiles = BTreeMap::new();
        assert!(learn(&mut profiles, &batch, 1.0).is_empty());
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_learn_merges_into_existing_profile() {
        let bucket = ContextBucket::new(ActivityLabel::Development, 14);
        let mut profiles = BTreeMap::new();

        let first = vec![
            change(bucket, "general:gaps_in", ConfigValue::Int(2)),
            change(bucket, "general:gaps_in", ConfigValue::Int(2)),
            change(bucket, "misc:vfr", ConfigValue::Bool(true)),
        ];
        learn(&mut profiles, &first, 1.0);

        let second = vec![
            change(bucket, "general:gaps_in", ConfigValue::Int(0)),
            change(bucket, "general:gaps_in", ConfigValue::Int(0)),
            change(bucket, "general:gaps_in", ConfigValue::Int(0)),
        ];
        learn(&mut profiles, &second, 2.0);

        let p = &profiles[&profile_id(&bucket)];
        assert_eq!(p.usage_frequency, 6);
        assert_eq!(p.preferred["general:gaps_in"], ConfigValue::Int(0));
        assert_eq!(p.preferred["misc:vfr"], ConfigValue::Bool(true));
        assert_eq!(p.last_used, 2.0);
        assert!((p.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_exact_match_outranks_partial() {
        let now = ContextBucket::new(ActivityLabel::Gaming, 20);
        let other_block = ContextBucket::new(ActivityLabel::Gaming, 8);

        let mut profiles = BTreeMap::new();
        let exact = profile(now, 8);
        let partial = profile(other_block, 10);
        profiles.insert(exact.profile_id.clone(), exact);
        profiles.insert(partial.profile_id.clone(), partial);

        // exact: 0.8 * 8 / 10 = 0.64, partial: 1.0 * 0.7 = 0.7
        let m = best_match(&profiles, &now).unwrap();
        assert_eq!(m.kind, MatchKind::Exact);
        assert_eq!(m.profile.bucket, now);
    }

    #[test]
    fn test_weak_matches_are_ignored() {
        let now = ContextBucket::new(ActivityLabel::Media, 12);
        let mut profiles = BTreeMap::new();
        let weak = profile(now, 5);
        profiles.insert(weak.profile_id.clone(), weak);

        // 0.5 * 5 / 10 = 0.25
        assert!(best_match(&profiles, &now).is_none());

        let elsewhere = ContextBucket::new(ActivityLabel::Work, 12);
        let unrelated = profile(elsewhere, 10);
        profiles.insert(unrelated.profile_id.clone(), unrelated);
        assert!(best_match(&profiles, &now).is_none());
    }
}
