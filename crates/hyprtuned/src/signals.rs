//! SIGINT/SIGTERM handling. Either signal flips the shutdown channel once.

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Wait for SIGINT or SIGTERM; returns the signal name.
pub async fn wait_for_signal() -> Result<&'static str> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    Ok(name)
}

pub fn spawn_listener(shutdown: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!("Received {}, shutting down", name),
            Err(e) => warn!("Signal handling unavailable ({}); shutting down", e),
        }
        shutdown.send_replace(true);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_is_observed() {
        let (tx, mut rx) = shutdown_channel();
        assert!(!*rx.borrow());
        tx.send_replace(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
