//! Starting and stopping hyprtuned
//!
//! `systemctl --user` is tried first. Without a user unit, start spawns the
//! daemon detached and stop sends SIGTERM to the pid in the pid file, but only
//! when `/proc/<pid>/comm` says that pid is still hyprtuned.

use crate::client::daemon_reachable;
use anyhow::{Context, Result};
use hyprtune_common::paths::SERVICE_NAME;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// How long start/stop wait for the socket to appear or go away
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Process name the kernel reports for the daemon
pub const DAEMON_COMM: &str = "hyprtuned";
pub const PROC_ROOT: &str = "/proc";

/// How the daemon was started or stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Systemd,
    Spawn(u32),
    Signal(i32),
    /// Nothing was signalled; the pid file named another process and was removed
    StalePidFile(i32),
}

/// What the pid file points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidCheck {
    Missing,
    Daemon(i32),
    /// The pid is gone or belongs to some other program
    Stale(i32),
}

/// `systemctl --user <action> hyprtuned.service`; false when it fails or
/// systemctl is unavailable.
pub async fn systemctl(action: &str) -> bool {
    Command::new("systemctl")
        .args(["--user", action, SERVICE_NAME])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Short unit state from `systemctl --user is-active`, if systemd knows the unit
pub async fn unit_state() -> Option<String> {
    let output = Command::new("systemctl")
        .args(["--user", "is-active", SERVICE_NAME])
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!state.is_empty()).then_some(state)
}

/// Launch `hyprtuned` in its own process group, detached from this terminal.
pub fn spawn_detached() -> Result<u32> {
    use std::os::unix::process::CommandExt;

    let child = std::process::Command::new("hyprtuned")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Failed to spawn hyprtuned")?;
    Ok(child.id())
}

/// Pid recorded by the daemon, if the file holds one
pub fn read_pid(pid_file: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_file)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}

fn process_name(proc_root: &Path, pid: i32) -> Option<String> {
    let comm = PathBuf::from(proc_root).join(pid.to_string()).join("comm");
    std::fs::read_to_string(comm)
        .ok()
        .map(|name| name.trim_end().to_string())
}

pub fn check_pid_file(pid_file: &Path, proc_root: &Path) -> PidCheck {
    match read_pid(pid_file) {
        None => PidCheck::Missing,
        Some(pid) if process_name(proc_root, pid).as_deref() == Some(DAEMON_COMM) => {
            PidCheck::Daemon(pid)
        }
        Some(pid) => PidCheck::Stale(pid),
    }
}

pub fn terminate(pid: i32) -> Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to {}", pid))
}

/// Poll until the daemon's reachability equals `up`.
pub async fn wait_for(socket_path: &Path, up: bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if daemon_reachable(socket_path).await == up {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn start() -> Result<Via> {
    if systemctl("start").await {
        return Ok(Via::Systemd);
    }
    spawn_detached().map(Via::Spawn)
}

pub async fn stop(pid_file: &Path) -> Result<Via> {
    if systemctl("stop").await {
        return Ok(Via::Systemd);
    }
    stop_by_pid_file(pid_file, Path::new(PROC_ROOT))
}

/// SIGTERM the pid in `pid_file` if it is hyprtuned; remove the file if it
/// points anywhere else.
pub fn stop_by_pid_file(pid_file: &Path, proc_root: &Path) -> Result<Via> {
    match check_pid_file(pid_file, proc_root) {
        PidCheck::Daemon(pid) => {
            terminate(pid)?;
            Ok(Via::Signal(pid))
        }
        PidCheck::Stale(pid) => {
            std::fs::remove_file(pid_file)
                .with_context(|| format!("Failed to remove {}", pid_file.display()))?;
            Ok(Via::StalePidFile(pid))
        }
        PidCheck::Missing => anyhow::bail!("No usable pid in {}", pid_file.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hyprtuned.pid");
        assert_eq!(read_pid(&path), None);

        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid(&path), None);

        std::fs::write(&path, "0").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    /// Fake `/proc` holding one process entry
    fn fake_proc(root: &Path, pid: u32, comm: &str) {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
    }

    #[test]
    fn test_check_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let pid_file = dir.path().join("hyprtuned.pid");
        assert_eq!(check_pid_file(&pid_file, &proc_root), PidCheck::Missing);

        fake_proc(&proc_root, 4242, "hyprtuned");
        fake_proc(&proc_root, 4343, "firefox");
        std::fs::write(&pid_file, "4242").unwrap();
        assert_eq!(check_pid_file(&pid_file, &proc_root), PidCheck::Daemon(4242));

        std::fs::write(&pid_file, "4343").unwrap();
        assert_eq!(check_pid_file(&pid_file, &proc_root), PidCheck::Stale(4343));

        // No such process at all
        std::fs::write(&pid_file, "4444").unwrap();
        assert_eq!(check_pid_file(&pid_file, &proc_root), PidCheck::Stale(4444));
    }

    #[test]
    fn test_stale_pid_is_not_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let pid_file = dir.path().join("hyprtuned.pid");
        // Our own pid, reused by something that is not the daemon
        let pid = std::process::id();
        fake_proc(&proc_root, pid, "cargo-test");
        std::fs::write(&pid_file, pid.to_string()).unwrap();

        let via = stop_by_pid_file(&pid_file, &proc_root).unwrap();

        assert_eq!(via, Via::StalePidFile(pid as i32));
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_daemon_pid_gets_sigterm() {
        use std::os::unix::process::ExitStatusExt;

        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let pid_file = dir.path().join("hyprtuned.pid");
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        fake_proc(&proc_root, child.id(), DAEMON_COMM);
        std::fs::write(&pid_file, child.id().to_string()).unwrap();

        let via = stop_by_pid_file(&pid_file, &proc_root).unwrap();

        assert_eq!(via, Via::Signal(child.id() as i32));
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_missing_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = stop_by_pid_file(&dir.path().join("none.pid"), dir.path()).unwrap_err();
        assert!(err.to_string().contains("No usable pid"));
    }

    #[tokio::test]
    async fn test_wait_for_absent_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("hyprtune.sock");
        assert!(wait_for(&socket, false, Duration::from_millis(10)).await);
        assert!(!wait_for(&socket, true, Duration::from_millis(10)).await);
    }
}
