//! Error types for hyprtune.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("hyprtuned is not running. Start it with `hyprtunectl start`.")]
    DaemonNotRunning,

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Required tool not found: {0}")]
    MissingTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TuneError {
    pub fn code(&self) -> i32 {
        match self {
            TuneError::DaemonNotRunning => -32000,
            TuneError::Socket(_) => -32001,
            TuneError::Rpc(_) => -32600,
            TuneError::Settings(_) => -32002,
            TuneError::InvalidTransition { .. } => -32003,
            TuneError::UnsupportedPlatform(_) => -32004,
            TuneError::MissingTool(_) => -32005,
            TuneError::Io(_) => -32006,
            TuneError::Json(_) => -32700,
            TuneError::Internal(_) => -32603,
        }
    }
}
