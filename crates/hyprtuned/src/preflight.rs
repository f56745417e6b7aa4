//! Startup checks. Anything fatal here stops the daemon before a loop starts.

use crate::exec::on_path;
use hyprtune_common::paths::DataLayout;
use hyprtune_common::TuneError;
use tracing::{info, warn};

/// Hyprland exports this to every client it launches
pub const INSTANCE_ENV: &str = "HYPRLAND_INSTANCE_SIGNATURE";

#[derive(Debug, Clone, Copy, Default)]
pub struct PreflightOptions {
    /// Skip the `hyprctl` check (headless testing)
    pub skip_tools: bool,
}

pub fn check_platform() -> Result<(), TuneError> {
    if cfg!(target_os = "linux") {
        Ok(())
    } else {
        Err(TuneError::UnsupportedPlatform(std::env::consts::OS.to_string()))
    }
}

pub fn check_tools() -> Result<(), TuneError> {
    if on_path("hyprctl") {
        Ok(())
    } else {
        Err(TuneError::MissingTool("hyprctl".to_string()))
    }
}

/// Create the data layout and prove it is writable.
pub fn check_data_dir(layout: &DataLayout) -> Result<(), TuneError> {
    layout.ensure()?;
    let scratch = layout.root().join(".write-test");
    std::fs::write(&scratch, b"ok")?;
    std::fs::remove_file(&scratch)?;
    Ok(())
}

pub fn run(layout: &DataLayout, opts: PreflightOptions) -> Result<(), TuneError> {
    check_platform()?;
    if opts.skip_tools {
        info!("Skipping tool checks");
    } else {
        check_tools()?;
        if std::env::var_os(INSTANCE_ENV).is_none() {
            warn!("{} is not set; is Hyprland running?", INSTANCE_ENV);
        }
    }
    check_data_dir(layout)?;
    info!("Preflight passed");
    Ok(())
}
