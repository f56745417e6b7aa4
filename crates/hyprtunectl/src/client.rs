//! RPC Client - Unix socket client for communicating with hyprtuned

use anyhow::{anyhow, Context, Result};
use hyprtune_common::rpc::{OptimizeAck, RpcMethod, RpcRequest, RpcResponse};
use hyprtune_common::{DaemonStatus, DetailedReport, TuneError};
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HyprtunedClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl HyprtunedClient {
    /// Connect to the daemon socket. A missing or refusing socket is
    /// reported as `TuneError::DaemonNotRunning`.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        match tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path)).await {
            Ok(Ok(stream)) => {
                let (reader, writer) = stream.into_split();
                Ok(Self {
                    reader: BufReader::new(reader),
                    writer,
                })
            }
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                Err(TuneError::DaemonNotRunning.into())
            }
            Ok(Err(e)) => Err(anyhow::Error::new(e)
                .context(format!("Failed to connect to {}", socket_path.display()))),
            Err(_) => Err(TuneError::Socket(format!(
                "timed out connecting to {}",
                socket_path.display()
            ))
            .into()),
        }
    }

    /// Send one request and return its `result`.
    pub async fn call(&mut self, method: RpcMethod) -> Result<serde_json::Value> {
        tokio::time::timeout(CALL_TIMEOUT, self.call_inner(method))
            .await
            .map_err(|_| anyhow!("RPC call timed out after {:?}", CALL_TIMEOUT))?
    }

    async fn call_inner(&mut self, method: RpcMethod) -> Result<serde_json::Value> {
        let request = RpcRequest::new(method, None);
        let line = serde_json::to_string(&request)? + "\n";
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut response_line = String::new();
        let n = self
            .reader
            .read_line(&mut response_line)
            .await
            .context("Failed to read response")?;
        if n == 0 {
            return Err(TuneError::Socket("daemon closed the connection".to_string()).into());
        }

        let response: RpcResponse =
            serde_json::from_str(&response_line).context("Failed to parse response")?;
        if response.id != request.id {
            return Err(TuneError::Rpc(format!(
                "response id {} does not match request {}",
                response.id, request.id
            ))
            .into());
        }
        if let Some(error) = response.error {
            return Err(TuneError::Rpc(format!("{} ({})", error.message, error.code)).into());
        }
        response
            .result
            .ok_or_else(|| TuneError::Rpc("response carries no result".to_string()).into())
    }

    async fn call_typed<T: DeserializeOwned>(&mut self, method: RpcMethod) -> Result<T> {
        let value = self.call(method).await?;
        serde_json::from_value(value).with_context(|| format!("Unexpected {:?} payload", method))
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.call(RpcMethod::Ping).await.map(|_| ())
    }

    pub async fn status(&mut self) -> Result<DaemonStatus> {
        self.call_typed(RpcMethod::Status).await
    }

    pub async fn report(&mut self) -> Result<DetailedReport> {
        self.call_typed(RpcMethod::Report).await
    }

    pub async fn optimize(&mut self) -> Result<OptimizeAck> {
        self.call_typed(RpcMethod::Optimize).await
    }
}

/// True when a daemon answers `ping` on `socket_path`.
pub async fn daemon_reachable(socket_path: &Path) -> bool {
    match HyprtunedClient::connect(socket_path).await {
        Ok(mut client) => client.ping().await.is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Answers every request line with `reply(request)`.
    fn fake_daemon<F>(listener: UnixListener, reply: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(RpcRequest) -> RpcResponse + Send + 'static,
    {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: RpcRequest = serde_json::from_str(&line).unwrap();
                let out = serde_json::to_string(&reply(request)).unwrap() + "\n";
                writer.write_all(out.as_bytes()).await.unwrap();
            }
        })
    }

    #[tokio::test]
    async fn test_missing_socket_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let err = HyprtunedClient::connect(&dir.path().join("absent.sock"))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<TuneError>(),
            Some(TuneError::DaemonNotRunning)
        ));
        assert!(!daemon_reachable(&dir.path().join("absent.sock")).await);
    }

    #[tokio::test]
    async fn test_typed_calls_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("hyprtune.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = fake_daemon(listener, |req| match req.method {
            RpcMethod::Optimize => RpcResponse::success(
                req.id,
                serde_json::json!({"accepted": true, "message": "queued"}),
            ),
            _ => RpcResponse::error(req.id, -32601, "nope".to_string()),
        });

        let mut client = HyprtunedClient::connect(&socket).await.unwrap();
        let ack = client.optimize().await.unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.message, "queued");

        let err = client.status().await.err().unwrap();
        assert!(err.to_string().contains("nope"));

        drop(client);
        server.await.unwrap();
    }
}
