//! Command execution seam
//!
//! Every external program the daemon touches (`hyprctl`, `nvidia-smi`,
//! `ping`, `systemctl`, `sudo`) goes through `CommandRunner` so that each call
//! is bounded by a timeout and so tests can script the outside world.
//!
//! Production code uses `SystemRunner`. Tests use `testing::ScriptedRunner`,
//! compiled only for unit tests and the `testing` feature.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default bound for a single external call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("`{0}` not found")]
    NotFound(String),

    #[error("`{program}` timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...`, waiting at most `timeout`.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

/// Runs real processes through tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ExecError::NotFound(program.to_string()))
            }
            Ok(Err(e)) => Err(ExecError::Spawn {
                program: program.to_string(),
                source: e,
            }),
            Err(_) => Err(ExecError::Timeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }
}

/// Whether `program` resolves to an executable on `PATH`.
pub fn on_path(program: &str) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        std::fs::metadata(dir.join(program))
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    })
}
