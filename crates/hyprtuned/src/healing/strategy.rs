//! Healing strategies
//!
//! Each issue category has an ordered list of strategies. A strategy applies
//! when every one of its preconditions holds against the latest sample; the
//! first applicable one is run. Destructive remedies additionally need their
//! `DestructiveAction` in the allow-list.

use crate::applier::{ActionGuard, Compositor, DestructiveAction};
use crate::exec::{CommandRunner, DEFAULT_TIMEOUT};
use hyprtune_common::{HealthSample, IssueCategory};
use sysinfo::{Signal, System};
use thiserror::Error;
use tracing::{info, warn};

/// Typed predicate over a health sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Precondition {
    CpuAbove(f64),
    GpuAbove(f64),
    MemoryAbove(f64),
    CompositorUnresponsive,
    Always,
}

impl Precondition {
    pub fn holds(&self, sample: &HealthSample) -> bool {
        match *self {
            Precondition::CpuAbove(limit) => sample.cpu_usage > limit,
            Precondition::GpuAbove(limit) => sample.gpu_usage > limit,
            Precondition::MemoryAbove(limit) => sample.memory_usage > limit,
            Precondition::CompositorUnresponsive => !sample.compositor_responsive,
            Precondition::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Remedy {
    ReduceAnimations,
    RestoreAnimations,
    DisableBlur,
    EnableBlur,
    KillResourceHogs,
    RestartCompositor,
    ResetToDefaults,
    RestoreUserConfig,
    RestartGpuDriver,
    AdjustRefreshRate,
    RestoreRefreshRate,
    ClearCaches,
    EnableZswap,
    DisableZswap,
    RestartPipewire,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: &'static str,
    pub description: &'static str,
    pub preconditions: &'static [Precondition],
    pub remedy: Remedy,
    pub rollback: Option<Remedy>,
}

impl Strategy {
    pub fn applies_to(&self, sample: &HealthSample) -> bool {
        self.preconditions.iter().all(|p| p.holds(sample))
    }
}

const PERFORMANCE: &[Strategy] = &[
    Strategy {
        name: "reduce_animations",
        description: "Disable animations and blur to improve performance",
        preconditions: &[Precondition::CpuAbove(85.0)],
        remedy: Remedy::ReduceAnimations,
        rollback: Some(Remedy::RestoreAnimations),
    },
    Strategy {
        name: "disable_blur",
        description: "Disable blur effects to reduce GPU load",
        preconditions: &[Precondition::GpuAbove(90.0)],
        remedy: Remedy::DisableBlur,
        rollback: Some(Remedy::EnableBlur),
    },
    Strategy {
        name: "kill_resource_hogs",
        description: "Terminate processes consuming excessive resources",
        preconditions: &[Precondition::MemoryAbove(95.0)],
        remedy: Remedy::KillResourceHogs,
        rollback: None,
    },
];

const STABILITY: &[Strategy] = &[
    Strategy {
        name: "restart_compositor",
        description: "Restart Hyprland",
        preconditions: &[Precondition::CompositorUnresponsive],
        remedy: Remedy::RestartCompositor,
        rollback: None,
    },
    Strategy {
        name: "reset_to_defaults",
        description: "Reload the configuration file, dropping runtime overrides",
        preconditions: &[Precondition::Always],
        remedy: Remedy::ResetToDefaults,
        rollback: Some(Remedy::RestoreUserConfig),
    },
];

const GRAPHICS: &[Strategy] = &[
    Strategy {
        name: "restart_gpu_driver",
        description: "Restart GPU driver modules",
        preconditions: &[Precondition::Always],
        remedy: Remedy::RestartGpuDriver,
        rollback: None,
    },
    Strategy {
        name: "adjust_refresh_rate",
        description: "Lower display refresh rate to 60 Hz",
        preconditions: &[Precondition::Always],
        remedy: Remedy::AdjustRefreshRate,
        rollback: Some(Remedy::RestoreRefreshRate),
    },
];

const MEMORY: &[Strategy] = &[
    Strategy {
        name: "clear_caches",
        description: "Drop the page cache to free memory",
        preconditions: &[Precondition::MemoryAbove(90.0)],
        remedy: Remedy::ClearCaches,
        rollback: None,
    },
    Strategy {
        name: "enable_zswap",
        description: "Enable compressed swap in RAM",
        preconditions: &[Precondition::Always],
        remedy: Remedy::EnableZswap,
        rollback: Some(Remedy::DisableZswap),
    },
];

const AUDIO: &[Strategy] = &[Strategy {
    name: "restart_pipewire",
    description: "Restart the PipeWire audio server",
    preconditions: &[Precondition::Always],
    remedy: Remedy::RestartPipewire,
    rollback: None,
}];

/// Strategies for a category, in order of preference
pub fn strategies_for(category: IssueCategory) -> &'static [Strategy] {
    match category {
        IssueCategory::Performance => PERFORMANCE,
        IssueCategory::Stability => STABILITY,
        IssueCategory::Graphics => GRAPHICS,
        IssueCategory::Memory => MEMORY,
        IssueCategory::Audio => AUDIO,
        IssueCategory::Input
        | IssueCategory::Disk
        | IssueCategory::Network
        | IssueCategory::System => &[],
    }
}

/// First strategy of `category` whose preconditions hold
pub fn select(category: IssueCategory, sample: &HealthSample) -> Option<&'static Strategy> {
    strategies_for(category)
        .iter()
        .find(|s| s.applies_to(sample))
}

#[derive(Debug, Error, PartialEq)]
pub enum RemedyError {
    #[error("{0} is not in allowed_actions")]
    NotAllowed(DestructiveAction),

    #[error("{0} is not performed automatically")]
    Stubbed(&'static str),

    #[error("{0}")]
    CommandFailed(String),

    #[error("{0}")]
    NoEffect(String),
}

/// What a remedy may touch
pub struct RemedyContext<'a> {
    pub compositor: &'a Compositor,
    pub guard: &'a ActionGuard,
}

const PROTECTED_PROCESSES: &[&str] = &["systemd", "kernel", "init", "kthreadd", "Hyprland"];

pub async fn execute(remedy: Remedy, ctx: &RemedyContext<'_>) -> Result<(), RemedyError> {
    let compositor = ctx.compositor;
    match remedy {
        Remedy::ReduceAnimations => {
            keyword(compositor, "animations:enabled", "no").await?;
            keyword(compositor, "decoration:blur:enabled", "no").await
        }
        Remedy::RestoreAnimations => {
            let animations = keyword(compositor, "animations:enabled", "yes").await;
            let blur = keyword(compositor, "decoration:blur:enabled", "yes").await;
            animations.and(blur)
        }
        Remedy::DisableBlur => keyword(compositor, "decoration:blur:enabled", "no").await,
        Remedy::EnableBlur => keyword(compositor, "decoration:blur:enabled", "yes").await,
        Remedy::KillResourceHogs => {
            require(ctx.guard, DestructiveAction::TerminateProcess)?;
            kill_resource_hogs().await
        }
        Remedy::RestartCompositor => {
            warn!("Compositor restart requested; this needs session management and is left to the user");
            Err(RemedyError::Stubbed("restart_compositor"))
        }
        Remedy::RestartGpuDriver => {
            warn!("GPU driver restart requested; this needs manual intervention");
            Err(RemedyError::Stubbed("restart_gpu_driver"))
        }
        Remedy::ResetToDefaults | Remedy::RestoreUserConfig => {
            if compositor.reload().await {
                Ok(())
            } else {
                Err(RemedyError::CommandFailed("hyprctl reload failed".into()))
            }
        }
        Remedy::AdjustRefreshRate => keyword(compositor, "monitor", ",preferred,auto,1,60").await,
        Remedy::RestoreRefreshRate => keyword(compositor, "monitor", ",preferred,auto,1").await,
        Remedy::ClearCaches => {
            require(ctx.guard, DestructiveAction::DropCaches)?;
            if crate::applier::drop_caches(compositor.runner().as_ref(), ctx.guard).await {
                Ok(())
            } else {
                Err(RemedyError::CommandFailed("dropping caches failed".into()))
            }
        }
        Remedy::EnableZswap => {
            require(ctx.guard, DestructiveAction::EnableZswap)?;
            let runner = compositor.runner().as_ref();
            run(runner, "sudo", &["-n", "modprobe", "zswap"]).await?;
            run(
                runner,
                "sudo",
                &["-n", "sh", "-c", "echo 1 > /sys/module/zswap/parameters/enabled"],
            )
            .await
        }
        Remedy::DisableZswap => {
            require(ctx.guard, DestructiveAction::EnableZswap)?;
            run(
                compositor.runner().as_ref(),
                "sudo",
                &["-n", "sh", "-c", "echo 0 > /sys/module/zswap/parameters/enabled"],
            )
            .await
        }
        Remedy::RestartPipewire => {
            require(ctx.guard, DestructiveAction::RestartAudio)?;
            let runner = compositor.runner().as_ref();
            run(runner, "systemctl", &["--user", "restart", "pipewire"]).await?;
            run(runner, "systemctl", &["--user", "restart", "pipewire-pulse"]).await
        }
    }
}

fn require(guard: &ActionGuard, action: DestructiveAction) -> Result<(), RemedyError> {
    if guard.permits(action) {
        Ok(())
    } else {
        info!("{} not in allowed_actions; skipping", action);
        Err(RemedyError::NotAllowed(action))
    }
}

async fn keyword(compositor: &Compositor, key: &str, arg: &str) -> Result<(), RemedyError> {
    if compositor.keyword_raw(key, arg).await {
        Ok(())
    } else {
        Err(RemedyError::CommandFailed(format!(
            "hyprctl keyword {} {} failed",
            key, arg
        )))
    }
}

async fn run(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> Result<(), RemedyError> {
    match runner.run(program, args, DEFAULT_TIMEOUT).await {
        Ok(out) if out.success() => Ok(()),
        Ok(out) => Err(RemedyError::CommandFailed(format!(
            "{} {} exited with {:?}",
            program,
            args.join(" "),
            out.status
        ))),
        Err(e) => Err(RemedyError::CommandFailed(e.to_string())),
    }
}

/// Send SIGTERM to up to three processes above 50% CPU or 20% memory.
async fn kill_resource_hogs() -> Result<(), RemedyError> {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_processes();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    system.refresh_processes();

    let total_memory = system.total_memory().max(1) as f64;
    let own_pid = sysinfo::get_current_pid().ok();

    let mut hogs: Vec<(f64, &sysinfo::Process)> = system
        .processes()
        .values()
        .filter(|p| Some(p.pid()) != own_pid)
        .filter(|p| !PROTECTED_PROCESSES.contains(&p.name()))
        .filter_map(|p| {
            let cpu = p.cpu_usage() as f64;
            let mem = p.memory() as f64 / total_memory * 100.0;
            (cpu > 50.0 || mem > 20.0).then_some((cpu + mem, p))
        })
        .collect();
    hogs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut killed = 0;
    for (_, process) in hogs.into_iter().take(3) {
        if process.kill_with(Signal::Term).unwrap_or(false) {
            info!(
                "Terminated resource-hogging process {} (pid {})",
                process.name(),
                process.pid()
            );
            killed += 1;
        }
    }

    if killed > 0 {
        Ok(())
    } else {
        Err(RemedyError::NoEffect("no resource hogs terminated".into()))
    }
}
