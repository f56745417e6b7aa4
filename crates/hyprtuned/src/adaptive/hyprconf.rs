//! Reader for the compositor's `hyprland.conf`
//!
//! Only scalar `key = value` settings are tracked. Nested sections are
//! flattened to the colon-joined form `hyprctl keyword` expects
//! (`decoration { blur { size = 8 } }` becomes `decoration:blur:size`).
//! Keys that may legitimately repeat (binds, exec, rules, monitors...) are
//! not tunable and are skipped.

use hyprtune_common::ConfigValue;
use std::collections::BTreeMap;

/// Parsed scalar settings, keyed by their `hyprctl keyword` name
pub type ConfigSnapshot = BTreeMap<String, ConfigValue>;

const REPEATABLE_PREFIXES: &[&str] = &["bind", "exec", "windowrule", "layerrule"];

const REPEATABLE_KEYS: &[&str] = &[
    "monitor",
    "env",
    "source",
    "bezier",
    "animation",
    "workspace",
    "submap",
    "plugin",
    "permission",
    "device",
];

fn is_tunable(leaf: &str) -> bool {
    !leaf.starts_with('$')
        && !REPEATABLE_PREFIXES.iter().any(|p| leaf.starts_with(p))
        && !REPEATABLE_KEYS.contains(&leaf)
}

/// Drop a trailing comment. `##` is an escaped literal `#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' {
            if chars.peek() == Some(&'#') {
                chars.next();
                out.push('#');
                continue;
            }
            break;
        }
        out.push(c);
    }
    out
}

pub fn parse_config(text: &str) -> ConfigSnapshot {
    let mut values = ConfigSnapshot::new();
    let mut sections: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = strip_comment(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_suffix('{') {
            sections.push(name.trim().to_string());
            continue;
        }
        if line == "}" {
            sections.pop();
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let leaf = key.trim();
        if leaf.is_empty() || !is_tunable(leaf) {
            continue;
        }

        let full_key = if sections.is_empty() {
            leaf.to_string()
        } else {
            format!("{}:{}", sections.join(":"), leaf)
        };
        values.insert(full_key, ConfigValue::from_hypr_text(value));
    }

    values
}

/// One detected difference between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub key: String,
    pub old: Option<ConfigValue>,
    pub new: ConfigValue,
}

/// Changed values and newly appearing keys. Removed keys are ignored.
pub fn diff(old: &ConfigSnapshot, new: &ConfigSnapshot) -> Vec<ValueChange> {
    new.iter()
        .filter_map(|(key, value)| match old.get(key) {
            Some(prev) if prev == value => None,
            prev => Some(ValueChange {
                key: key.clone(),
                old: prev.cloned(),
                new: value.clone(),
            }),
        })
        .collect()
}
