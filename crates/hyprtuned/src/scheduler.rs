//! Scheduled task runner
//!
//! Each daemon loop is a `ScheduledTask`: collect an observation, decide a
//! plan, apply it, then sleep for the task's interval. Ticks of one task never
//! overlap. A failed tick is logged and followed by a doubled sleep. The
//! shutdown signal is honoured at the sleep boundary, so an in-flight tick
//! always completes.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[async_trait]
pub trait ScheduledTask: Send + 'static {
    type Observation: Send;
    type Plan: Send;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Sleep between ticks
    fn interval(&self) -> Duration;

    async fn collect(&mut self) -> Result<Self::Observation>;

    async fn decide(&mut self, observation: Self::Observation) -> Result<Self::Plan>;

    async fn apply(&mut self, plan: Self::Plan) -> Result<()>;

    /// Called once after the last tick.
    async fn shutdown(&mut self) {}
}

/// Run one collect → decide → apply pass.
pub async fn tick<T: ScheduledTask>(task: &mut T) -> Result<()> {
    let observation = task.collect().await?;
    let plan = task.decide(observation).await?;
    task.apply(plan).await
}

/// Sleep before the next tick; doubled after a failed tick
pub fn next_delay(interval: Duration, tick_ok: bool) -> Duration {
    if tick_ok {
        interval
    } else {
        interval.saturating_mul(2)
    }
}

/// Drive `task` until `shutdown` turns true or its sender is dropped.
/// Returns the task so callers can inspect its final state.
pub async fn run_task<T: ScheduledTask>(mut task: T, mut shutdown: watch::Receiver<bool>) -> T {
    info!("{} loop started (every {:?})", task.name(), task.interval());

    loop {
        if *shutdown.borrow() {
            break;
        }

        let ok = match tick(&mut task).await {
            Ok(()) => true,
            Err(e) => {
                error!("{} tick failed: {:#}", task.name(), e);
                false
            }
        };

        let delay = next_delay(task.interval(), ok);
        debug!("{} sleeping {:?}", task.name(), delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    task.shutdown().await;
    info!("{} loop stopped", task.name());
    task
}
