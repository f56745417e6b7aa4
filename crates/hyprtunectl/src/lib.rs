//! hyprtunectl - control client for hyprtuned

pub mod client;
pub mod commands;
pub mod health;
pub mod output;
pub mod service;
pub mod stats;
