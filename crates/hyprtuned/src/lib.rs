//! hyprtuned - Hyprland tuning daemon
//!
//! Three scheduled loops (AI optimizer, adaptive config, self-healing) share
//! one orchestrator that scores health, coordinates the loops and answers
//! `hyprtunectl` over a unix socket.

pub mod adaptive;
pub mod applier;
pub mod collector;
pub mod daemon;
pub mod exec;
pub mod healing;
pub mod history;
pub mod logging;
pub mod optimizer;
pub mod orchestrator;
pub mod preflight;
pub mod rpc_server;
pub mod scheduler;
pub mod signals;
pub mod state_file;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
