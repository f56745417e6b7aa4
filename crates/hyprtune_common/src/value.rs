//! Strongly typed configuration values.
//!
//! Values arrive as text from two edges: the compositor's config file and the
//! `hyprtunectl config set` command line. Each edge has its own inference rule
//! and both run exactly once; everything downstream matches on the variant.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ConfigValue {
    /// Infer a value from a `hyprland.conf` right-hand side.
    ///
    /// `true/yes/1` and `false/no/0` are booleans, integral numbers are
    /// integers, other finite numbers are floats, anything else is text.
    pub fn from_hypr_text(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => return ConfigValue::Bool(true),
            "false" | "no" | "0" => return ConfigValue::Bool(false),
            _ => {}
        }

        match raw.parse::<f64>().ok().filter(|v| v.is_finite()) {
            Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => ConfigValue::Int(v as i64),
            Some(v) => ConfigValue::Float(v),
            None => ConfigValue::Text(raw.to_string()),
        }
    }

    /// Infer a value typed on the command line.
    ///
    /// `true/false` are booleans, anything containing a dot is a float (text
    /// when it does not parse), all-digit strings are integers.
    pub fn infer_cli(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower == "true" || lower == "false" {
            return ConfigValue::Bool(lower == "true");
        }

        if raw.contains('.') {
            return match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => ConfigValue::Float(v),
                _ => ConfigValue::Text(raw.to_string()),
            };
        }

        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(v) = raw.parse::<i64>() {
                return ConfigValue::Int(v);
            }
        }

        ConfigValue::Text(raw.to_string())
    }

    /// Render the value as a `hyprctl keyword` argument.
    pub fn to_hyprctl_arg(&self) -> String {
        match self {
            ConfigValue::Bool(true) => "yes".to_string(),
            ConfigValue::Bool(false) => "no".to_string(),
            ConfigValue::Int(v) => v.to_string(),
            ConfigValue::Float(v) => v.to_string(),
            ConfigValue::Text(s) => s.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ConfigValue::Int(v) => Some(*v as f64),
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigValue::Bool(b) => serde_json::Value::Bool(*b),
            ConfigValue::Int(v) => serde_json::Value::from(*v),
            ConfigValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ConfigValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Text(s) => write!(f, "{}", s),
        }
    }
}
