//! Shared types for hyprtune: settings, records, reports and the RPC envelope.

pub mod error;
pub mod paths;
pub mod report;
pub mod rpc;
pub mod settings;
pub mod types;
pub mod value;

pub use error::TuneError;
pub use report::*;
pub use settings::{Settings, SettingsStore};
pub use types::*;
pub use value::ConfigValue;

/// Current unix time in fractional seconds.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
