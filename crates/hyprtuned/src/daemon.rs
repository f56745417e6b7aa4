//! Daemon wiring: build the enabled loops, hand their report channels to the
//! orchestrator, serve RPC, and tear everything down on SIGINT/SIGTERM.

use crate::adaptive::profiles::ProfileFile;
use crate::adaptive::AdaptiveLoop;
use crate::applier::{ActionGuard, Compositor};
use crate::collector::Collector;
use crate::exec::{CommandRunner, SystemRunner};
use crate::healing::HealingLoop;
use crate::optimizer::OptimizerLoop;
use crate::orchestrator::{OptimizerHandle, Orchestrator};
use crate::scheduler::{run_task, ScheduledTask};
use crate::store::{AdaptiveStore, HealingStore, OptimizerStore};
use crate::{rpc_server, signals};
use anyhow::{Context, Result};
use hyprtune_common::paths::{self, DataLayout};
use hyprtune_common::{OrchestratorState, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which loops to run and where the runtime files live
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub ai_optimizer: bool,
    pub adaptive_config: bool,
    pub self_healing: bool,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            ai_optimizer: true,
            adaptive_config: true,
            self_healing: true,
            socket_path: paths::socket_path(),
            pid_file: paths::pid_file(),
        }
    }
}

/// The loops a run will start, after CLI flags and settings are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledLoops {
    pub ai_optimizer: bool,
    pub adaptive_config: bool,
    pub self_healing: bool,
}

impl EnabledLoops {
    pub fn resolve(opts: &DaemonOptions, settings: &Settings) -> Self {
        Self {
            ai_optimizer: opts.ai_optimizer && settings.ai_optimizer.enabled,
            adaptive_config: opts.adaptive_config && settings.adaptive_config.enabled,
            self_healing: opts.self_healing && settings.self_healing.enabled,
        }
    }

    pub fn any(&self) -> bool {
        self.ai_optimizer || self.adaptive_config || self.self_healing
    }
}

fn spawn_loop<T: ScheduledTask>(task: T, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_task(task, shutdown).await;
    })
}

/// Pid file that is removed again when dropped, on success and error paths alike
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Log a lifecycle step that has no error path left to take.
async fn advance(orchestrator: &Orchestrator, next: OrchestratorState) {
    if let Err(e) = orchestrator.transition(next).await {
        warn!("{}", e);
    }
}

/// Run until a shutdown signal arrives.
pub async fn run(settings: Settings, layout: DataLayout, opts: DaemonOptions) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = signals::shutdown_channel();
    signals::spawn_listener(shutdown_tx.clone());
    run_until(settings, layout, opts, shutdown_tx, shutdown_rx).await
}

/// Run until `shutdown` flips to true.
///
/// Every fallible step (stores, loops, socket) runs before any task is
/// spawned, so an early return leaves nothing running and the pid file guard
/// removes the pid file.
pub async fn run_until(
    settings: Settings,
    layout: DataLayout,
    opts: DaemonOptions,
    shutdown_tx: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let enabled = EnabledLoops::resolve(&opts, &settings);
    if !enabled.any() {
        warn!("Every loop is disabled; only the RPC server will run");
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let guard = ActionGuard::from_names(&settings.self_healing.allowed_actions);
    let mut orchestrator = Orchestrator::new(Compositor::new(Arc::clone(&runner)), guard);
    orchestrator.transition(OrchestratorState::Starting).await?;

    layout
        .ensure()
        .with_context(|| format!("Failed to create {}", layout.root().display()))?;
    let _pid_file = PidFile::create(&opts.pid_file)?;
    let retention_days = settings.system.data_retention_days;

    let optimizer = if enabled.ai_optimizer {
        Some(OptimizerLoop::new(
            settings.ai_optimizer.clone(),
            retention_days,
            Collector::new(Arc::clone(&runner)),
            Compositor::new(Arc::clone(&runner)),
            OptimizerStore::open_at(layout.optimizer_db())?,
            layout.model_file(),
        )?)
    } else {
        None
    };

    let adaptive = if enabled.adaptive_config {
        Some(AdaptiveLoop::new(
            settings.adaptive_config.clone(),
            paths::expand_home(&settings.system.hyprland_config),
            retention_days,
            Collector::new(Arc::clone(&runner)),
            Compositor::new(Arc::clone(&runner)),
            AdaptiveStore::open_at(layout.adaptive_db())?,
            ProfileFile::new(layout.profiles_file()),
        )?)
    } else {
        None
    };

    let healing = if enabled.self_healing {
        Some(HealingLoop::new(
            settings.self_healing.clone(),
            Collector::new(Arc::clone(&runner)),
            Compositor::new(Arc::clone(&runner)),
            HealingStore::open_at(layout.healing_db())?,
        )?)
    } else {
        None
    };

    let listener = rpc_server::bind(&opts.socket_path).await?;

    let mut loops = Vec::new();
    if let Some(optimizer) = optimizer {
        orchestrator = orchestrator.with_optimizer(OptimizerHandle {
            reports: optimizer.subscribe(),
            controls: optimizer.controls(),
        });
        loops.push(spawn_loop(optimizer, shutdown.clone()));
    }
    if let Some(adaptive) = adaptive {
        orchestrator = orchestrator.with_adaptive(adaptive.subscribe());
        loops.push(spawn_loop(adaptive, shutdown.clone()));
    }
    if let Some(healing) = healing {
        orchestrator = orchestrator.with_healing(healing.subscribe());
        loops.push(spawn_loop(healing, shutdown.clone()));
    }

    let orchestrator = Arc::new(orchestrator);
    let rpc = tokio::spawn(rpc_server::serve(
        listener,
        opts.socket_path.clone(),
        Arc::clone(&orchestrator),
        shutdown.clone(),
    ));
    let monitor = tokio::spawn(Arc::clone(&orchestrator).run_health_monitor(shutdown.clone()));
    let reporter = tokio::spawn(Arc::clone(&orchestrator).run_status_reporter(shutdown.clone()));

    advance(&orchestrator, OrchestratorState::Running).await;
    info!(
        "hyprtuned running (optimizer: {}, adaptive: {}, healing: {})",
        enabled.ai_optimizer, enabled.adaptive_config, enabled.self_healing
    );

    let mut watcher = shutdown;
    while !*watcher.borrow() {
        if watcher.changed().await.is_err() {
            break;
        }
    }
    // Reaches tasks even when the loop above ended on a dropped sender
    shutdown_tx.send_replace(true);

    advance(&orchestrator, OrchestratorState::Stopping).await;

    // Loops finish their in-flight tick before returning
    for handle in loops {
        if let Err(e) = handle.await {
            warn!("Loop task ended abnormally: {}", e);
        }
    }
    for handle in [monitor, reporter, rpc] {
        let _ = handle.await;
    }

    advance(&orchestrator, OrchestratorState::Stopped).await;

    let _ = std::fs::remove_file(&opts.socket_path);
    info!("hyprtuned stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_loop_needs_flag_and_setting() {
        let mut settings = Settings::default();
        settings.adaptive_config.enabled = false;
        let opts = DaemonOptions {
            ai_optimizer: false,
            ..DaemonOptions::default()
        };

        let enabled = EnabledLoops::resolve(&opts, &settings);
        assert!(!enabled.ai_optimizer);
        assert!(!enabled.adaptive_config);
        assert!(enabled.self_healing);
        assert!(enabled.any());
    }

    #[tokio::test]
    async fn test_runs_and_cleans_up_with_loops_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let opts = DaemonOptions {
            ai_optimizer: false,
            adaptive_config: false,
            self_healing: false,
            socket_path: dir.path().join("run/hyprtune.sock"),
            pid_file: dir.path().join("run/hyprtuned.pid"),
        };
        let layout = DataLayout::at(dir.path().join("data"));
        let (tx, rx) = signals::shutdown_channel();

        let daemon = tokio::spawn(run_until(
            Settings::default(),
            layout,
            opts.clone(),
            tx.clone(),
            rx,
        ));

        for _ in 0..100 {
            if opts.socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(opts.socket_path.exists());
        assert!(opts.pid_file.exists());

        tx.send_replace(true);
        daemon.await.unwrap().unwrap();
        assert!(!opts.socket_path.exists());
        assert!(!opts.pid_file.exists());
    }

    #[tokio::test]
    async fn test_failed_start_removes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = DaemonOptions {
            ai_optimizer: true,
            adaptive_config: false,
            self_healing: false,
            socket_path: dir.path().join("run/hyprtune.sock"),
            pid_file: dir.path().join("run/hyprtuned.pid"),
        };
        let layout = DataLayout::at(dir.path().join("data"));
        // A directory where the optimizer database should be
        std::fs::create_dir_all(layout.optimizer_db()).unwrap();
        let (tx, rx) = signals::shutdown_channel();

        let result = run_until(Settings::default(), layout, opts.clone(), tx, rx).await;

        assert!(result.is_err());
        assert!(!opts.pid_file.exists());
        assert!(!opts.socket_path.exists());
    }

    #[test]
    fn test_pid_file_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/hyprtuned.pid");
        {
            let _guard = PidFile::create(&path).unwrap();
            let pid = std::fs::read_to_string(&path).unwrap();
            assert_eq!(pid.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }

    struct Idle {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ScheduledTask for Idle {
        type Observation = ();
        type Plan = ();

        fn name(&self) -> &'static str {
            "idle"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn collect(&mut self) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn decide(&mut self, _observation: ()) -> Result<()> {
            Ok(())
        }

        async fn apply(&mut self, _plan: ()) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawned_loop_ends_on_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = signals::shutdown_channel();
        let handle = spawn_loop(
            Idle {
                ticks: Arc::clone(&ticks),
            },
            rx,
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send_replace(true);
        handle.await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
