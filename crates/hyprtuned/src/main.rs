//! hyprtuned - Hyprland tuning daemon

use anyhow::Result;
use clap::Parser;
use hyprtune_common::paths::{self, DataLayout};
use hyprtune_common::Settings;
use hyprtuned::daemon::{self, DaemonOptions};
use hyprtuned::logging;
use hyprtuned::preflight::{self, PreflightOptions};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hyprtuned")]
#[command(about = "Hyprland tuning daemon", version)]
struct Cli {
    /// Do not start the AI optimizer loop
    #[arg(long)]
    no_ai_optimizer: bool,

    /// Do not start the adaptive configuration loop
    #[arg(long)]
    no_adaptive_config: bool,

    /// Do not start the self-healing loop
    #[arg(long)]
    no_self_healing: bool,

    /// Skip the hyprctl and Hyprland session checks
    #[arg(long)]
    skip_preflight: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = paths::settings_path();
    let (settings, settings_error) = match Settings::load(&settings_path) {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::default(), Some(e)),
    };

    let layout = DataLayout::from_env();
    logging::init(
        &settings.system.log_level,
        &layout.log_file(),
        &settings.system.max_log_size,
    )?;

    info!("hyprtuned v{} starting", env!("CARGO_PKG_VERSION"));
    if let Some(e) = settings_error {
        error!("Using default settings: {}", e);
    }

    let checks = PreflightOptions {
        skip_tools: cli.skip_preflight,
    };
    if let Err(e) = preflight::run(&layout, checks) {
        error!("Preflight failed: {}", e);
        std::process::exit(1);
    }

    let opts = DaemonOptions {
        ai_optimizer: !cli.no_ai_optimizer,
        adaptive_config: !cli.no_adaptive_config,
        self_healing: !cli.no_self_healing,
        ..DaemonOptions::default()
    };
    daemon::run(settings, layout, opts).await
}
