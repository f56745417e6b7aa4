//! RPC Server - Unix socket server for hyprtunectl
//!
//! One JSON-RPC 2.0 request per line, one response per line.

use crate::orchestrator::Orchestrator;
use anyhow::{Context, Result};
use hyprtune_common::rpc::{RpcMethod, RpcRequest, RpcResponse};
use hyprtune_common::TuneError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;

/// Bind `socket_path`, replacing a stale socket.
pub async fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(dir) = socket_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .context("Failed to create socket directory")?;
    }

    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

    // Owner only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!("RPC server listening on {}", socket_path.display());
    Ok(listener)
}

/// Accept connections until shutdown, then remove the socket.
pub async fn serve(
    listener: UnixListener,
    socket_path: PathBuf,
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let orchestrator = Arc::clone(&orchestrator);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, orchestrator).await {
                            error!("Connection handler error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let _ = tokio::fs::remove_file(&socket_path).await;
    debug!("RPC server stopped");
}

async fn handle_connection(stream: UnixStream, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read from socket")?;

        if bytes_read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(request) => handle_request(request, &orchestrator).await,
            Err(response) => response,
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
    }

    Ok(())
}

/// Decode one line; malformed input becomes an error response.
fn parse_request(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        warn!("Invalid request JSON: {}", e);
        RpcResponse::error(String::new(), PARSE_ERROR, format!("Parse error: {}", e))
    })?;

    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    serde_json::from_value(value).map_err(|e| {
        warn!("Invalid request: {}", e);
        RpcResponse::error(id, INVALID_REQUEST, format!("Invalid request: {}", e))
    })
}

async fn handle_request(request: RpcRequest, orchestrator: &Orchestrator) -> RpcResponse {
    debug!("RPC {:?}", request.method);
    let id = request.id;
    match request.method {
        RpcMethod::Ping => RpcResponse::success(id, serde_json::json!("pong")),
        RpcMethod::Status => respond(id, &orchestrator.status().await),
        RpcMethod::Report => respond(id, &orchestrator.detailed_report().await),
        RpcMethod::Optimize => respond(id, &orchestrator.request_optimization()),
    }
}

fn respond<T: Serialize>(id: String, result: &T) -> RpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => {
            let e = TuneError::from(e);
            RpcResponse::error(id, e.code(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::{ActionGuard, Compositor};
    use crate::testing::ScriptedRunner;
    use hyprtune_common::DaemonStatus;

    async fn roundtrip(socket: &Path, line: &str) -> RpcResponse {
        let stream = UnixStream::connect(socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_status_ping_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("hyprtune.sock");
        let orchestrator = Arc::new(Orchestrator::new(
            Compositor::new(Arc::new(ScriptedRunner::succeeding())),
            ActionGuard::default(),
        ));

        let (tx, rx) = watch::channel(false);
        let listener = bind(&socket).await.unwrap();
        let server = tokio::spawn(serve(listener, socket.clone(), orchestrator, rx));

        let ping = RpcRequest::new(RpcMethod::Ping, None);
        let resp = roundtrip(&socket, &serde_json::to_string(&ping).unwrap()).await;
        assert_eq!(resp.id, ping.id);
        assert_eq!(resp.result, Some(serde_json::json!("pong")));

        let status = RpcRequest::new(RpcMethod::Status, None);
        let resp = roundtrip(&socket, &serde_json::to_string(&status).unwrap()).await;
        let status: DaemonStatus = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(status.system_health_score, 75.0);
        assert!(!status.ai_optimizer_active);

        let resp = roundtrip(&socket, "not json").await;
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);

        let resp = roundtrip(&socket, r#"{"jsonrpc":"2.0","method":"reboot","id":"7"}"#).await;
        assert_eq!(resp.id, "7");
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);

        tx.send_replace(true);
        server.await.unwrap();
        assert!(!socket.exists());
    }
}
