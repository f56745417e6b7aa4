//! Metrics collector
//!
//! Best-effort snapshots of the machine and the compositor. Every source is
//! independent: a failing command or unreadable pseudo-file degrades that one
//! field to its default and never aborts the snapshot.
//!
//! Sources:
//! - sysinfo: CPU, memory, root filesystem, processes, component temperatures
//! - `nvidia-smi`: GPU utilisation, temperature and memory
//! - `hyprctl clients|workspaces|activeworkspace`: windows, workspaces, app classes
//! - `ping -c 1 8.8.8.8`: network latency
//! - `/proc` and `/sys`: load, IO and network counters, battery, backlight, power

use crate::exec::{CommandRunner, DEFAULT_TIMEOUT};
use chrono::{DateTime, Datelike, Local, Timelike};
use hyprtune_common::{ActivityLabel, HealthSample, OptimizerSample, UserContext};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use sysinfo::{Components, Disks, System};
use tracing::{debug, warn};

const GAMING_INDICATORS: &[&str] = &[
    "steam", "lutris", "wine", "proton", "gamemode", "minecraft", "dota", "csgo", "valorant",
    "league",
];

const CODING_INDICATORS: &[&str] = &[
    "code", "vim", "neovim", "emacs", "intellij", "pycharm", "vscode", "atom", "sublime",
    "terminal", "kitty", "alacritty",
];

const MEDIA_INDICATORS: &[&str] = &[
    "firefox", "chrome", "mpv", "vlc", "spotify", "discord", "youtube", "netflix", "plex",
    "kodi",
];

const NVIDIA_QUERY: &str =
    "--query-gpu=utilization.gpu,temperature.gpu,memory.used,memory.total";

/// Reading from `nvidia-smi`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpuReading {
    pub usage: f64,
    pub temperature: f64,
    /// Used VRAM as a percentage of total
    pub memory: f64,
}

/// What `hyprctl` told us this round
#[derive(Debug, Clone, Default)]
struct CompositorView {
    clients: Option<String>,
    workspaces: Option<String>,
    responsive: bool,
}

/// Snapshot source shared by the three loops
pub struct Collector {
    system: System,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    /// Root under which `/proc` and `/sys` are read
    fs_root: PathBuf,
    cpu_primed: bool,
    last_io: Option<(u64, u64)>,
    last_net: Option<(u64, u64)>,
    last_workspace: Option<u64>,
}

impl Collector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_root(runner, "/")
    }

    /// Collector reading pseudo-files below `fs_root` instead of `/`.
    pub fn with_root<P: AsRef<Path>>(runner: Arc<dyn CommandRunner>, fs_root: P) -> Self {
        Self {
            system: System::new(),
            runner,
            timeout: DEFAULT_TIMEOUT,
            fs_root: fs_root.as_ref().to_path_buf(),
            cpu_primed: false,
            last_io: None,
            last_net: None,
            last_workspace: None,
        }
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Health snapshot for the self-healing loop
    pub async fn collect_health(&mut self, timestamp: f64) -> HealthSample {
        let cpu_usage = self.cpu_usage().await;
        let memory_usage = self.memory_usage();
        let gpu = self.gpu().await;
        let compositor = self.compositor_view().await;

        self.system.refresh_processes();
        let active_processes = self.system.processes().len() as u64;

        HealthSample {
            timestamp,
            cpu_usage,
            memory_usage,
            gpu_usage: gpu.usage,
            cpu_temperature: cpu_temperature(),
            gpu_temperature: gpu.temperature,
            disk_usage: root_disk_usage(),
            network_latency_ms: self.latency().await,
            active_processes,
            system_load: self.load_average(),
            active_windows: compositor
                .clients
                .as_deref()
                .map(count_windows)
                .unwrap_or(0),
            workspace_count: compositor
                .workspaces
                .as_deref()
                .map(count_workspaces)
                .unwrap_or(0),
            compositor_responsive: compositor.responsive,
        }
    }

    /// Snapshot for the optimizer loop. IO and network values are deltas
    /// since the previous call (zero on the first one).
    pub async fn collect_optimizer_sample(&mut self, timestamp: f64) -> OptimizerSample {
        let cpu_usage = self.cpu_usage().await;
        let memory_usage = self.memory_usage();
        let gpu = self.gpu().await;
        let compositor = self.compositor_view().await;

        let (io_read, io_write) = self.io_delta();
        let (network_recv, network_sent) = self.net_delta();

        OptimizerSample {
            timestamp,
            cpu_usage,
            memory_usage,
            gpu_usage: gpu.usage,
            gpu_memory: gpu.memory,
            io_read,
            io_write,
            network_sent,
            network_recv,
            active_windows: compositor
                .clients
                .as_deref()
                .map(count_windows)
                .unwrap_or(0),
            workspace_switches: self.workspace_switches().await,
            power_consumption: self.power_draw(),
            temperature: any_temperature(),
            battery_level: self.battery_level(),
            ..OptimizerSample::default()
        }
    }

    /// Capture what the user is doing at `now`.
    pub async fn capture_context(&mut self, now: DateTime<Local>) -> UserContext {
        let compositor = self.compositor_view().await;
        let active_applications = compositor
            .clients
            .as_deref()
            .map(application_classes)
            .unwrap_or_default();
        let window_count = compositor
            .clients
            .as_deref()
            .map(count_windows)
            .unwrap_or(0);
        let workspace_layout = compositor
            .workspaces
            .as_deref()
            .map(|w| format!("workspaces_{}", count_workspaces(w)))
            .unwrap_or_else(|| "default".to_string());

        let hour = now.hour();
        let is_gaming = matches_any(&active_applications, GAMING_INDICATORS);
        let is_coding = matches_any(&active_applications, CODING_INDICATORS);
        let is_media = matches_any(&active_applications, MEDIA_INDICATORS);
        let activity = classify_activity(&active_applications, window_count, hour);

        UserContext {
            timestamp: now.timestamp_millis() as f64 / 1000.0,
            hour_of_day: hour,
            day_of_week: now.weekday().num_days_from_monday(),
            active_applications,
            workspace_layout,
            window_count,
            screen_brightness: self.brightness(),
            system_load: self.load_average(),
            battery_level: self.battery_level(),
            is_gaming,
            is_coding,
            is_media,
            activity,
        }
    }

    async fn cpu_usage(&mut self) -> f64 {
        if !self.cpu_primed {
            // sysinfo needs two refreshes spaced apart for a usable reading
            self.system.refresh_cpu();
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.cpu_primed = true;
        }
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
    }

    fn memory_usage(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64 * 100.0
    }

    async fn gpu(&self) -> GpuReading {
        self.query("nvidia-smi", &[NVIDIA_QUERY, "--format=csv,noheader,nounits"])
            .await
            .ok()
            .flatten()
            .and_then(|out| parse_nvidia_csv(&out))
            .unwrap_or_default()
    }

    async fn latency(&self) -> f64 {
        self.query("ping", &["-c", "1", "8.8.8.8"])
            .await
            .ok()
            .flatten()
            .and_then(|out| parse_ping_time(&out))
            .unwrap_or(0.0)
    }

    async fn compositor_view(&self) -> CompositorView {
        let mut view = CompositorView {
            responsive: true,
            ..CompositorView::default()
        };

        match self.query("hyprctl", &["clients"]).await {
            Ok(out) => view.clients = out,
            Err(TimedOut) => view.responsive = false,
        }
        if view.responsive {
            match self.query("hyprctl", &["workspaces"]).await {
                Ok(out) => view.workspaces = out,
                Err(TimedOut) => view.responsive = false,
            }
        }
        view
    }

    async fn workspace_switches(&mut self) -> u32 {
        let current = self
            .query("hyprctl", &["activeworkspace"])
            .await
            .ok()
            .flatten()
            .and_then(|out| parse_workspace_id(&out));

        let switched = match (self.last_workspace, current) {
            (Some(prev), Some(cur)) if prev != cur => 1,
            _ => 0,
        };
        if current.is_some() {
            self.last_workspace = current;
        }
        switched
    }

    /// Run a query command. `Ok(None)` covers every failure except a timeout.
    async fn query(&self, program: &str, args: &[&str]) -> Result<Option<String>, TimedOut> {
        match self.runner.run(program, args, self.timeout).await {
            Ok(out) if out.success() => Ok(Some(out.stdout)),
            Ok(out) => {
                warn!(
                    "{} {} exited with {:?}: {}",
                    program,
                    args.join(" "),
                    out.status,
                    out.stderr.trim()
                );
                Ok(None)
            }
            Err(e) if e.is_timeout() => {
                warn!("{}", e);
                Err(TimedOut)
            }
            Err(crate::exec::ExecError::NotFound(p)) => {
                debug!("{} not installed", p);
                Ok(None)
            }
            Err(e) => {
                warn!("{}", e);
                Ok(None)
            }
        }
    }

    fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.fs_root.join(relative)).ok()
    }

    fn load_average(&self) -> f64 {
        self.read("proc/loadavg")
            .and_then(|s| parse_loadavg(&s))
            .unwrap_or(0.0)
    }

    fn battery_level(&self) -> f64 {
        self.read("sys/class/power_supply/BAT0/capacity")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(100.0)
    }

    /// First backlight device, as a fraction of its maximum
    fn brightness(&self) -> f64 {
        let dir = self.fs_root.join("sys/class/backlight");
        let mut devices: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => return 0.5,
        };
        devices.sort();

        let read_num = |p: PathBuf| -> Option<f64> {
            std::fs::read_to_string(p).ok()?.trim().parse::<f64>().ok()
        };
        devices
            .into_iter()
            .find_map(|dev| {
                let current = read_num(dev.join("brightness"))?;
                let max = read_num(dev.join("max_brightness"))?;
                (max > 0.0).then(|| current / max)
            })
            .unwrap_or(0.5)
    }

    /// Sum of RAPL energy counters, in joules
    fn power_draw(&self) -> f64 {
        let dir = self.fs_root.join("sys/class/powercap");
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0.0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| std::fs::read_to_string(e.path().join("energy_uj")).ok())
            .filter_map(|s| s.trim().parse::<f64>().ok())
            .sum::<f64>()
            / 1_000_000.0
    }

    fn io_delta(&mut self) -> (f64, f64) {
        let current = self.read("proc/diskstats").map(|s| parse_diskstats(&s));
        delta(&mut self.last_io, current)
    }

    fn net_delta(&mut self) -> (f64, f64) {
        let current = self.read("proc/net/dev").map(|s| parse_net_dev(&s));
        delta(&mut self.last_net, current)
    }
}

#[derive(Debug)]
struct TimedOut;

fn delta(last: &mut Option<(u64, u64)>, current: Option<(u64, u64)>) -> (f64, f64) {
    let Some(cur) = current else {
        return (0.0, 0.0);
    };
    let out = match *last {
        Some(prev) => (
            cur.0.saturating_sub(prev.0) as f64,
            cur.1.saturating_sub(prev.1) as f64,
        ),
        None => (0.0, 0.0),
    };
    *last = Some(cur);
    out
}

fn cpu_temperature() -> f64 {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .find(|c| {
            let label = c.label().to_ascii_lowercase();
            label.contains("coretemp") || label.contains("k10temp")
        })
        .map(|c| c.temperature() as f64)
        .unwrap_or(0.0)
}

fn any_temperature() -> f64 {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .map(|c| c.temperature() as f64)
        .find(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(0.0)
}

fn root_disk_usage() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let used = d.total_space().saturating_sub(d.available_space());
            used as f64 / d.total_space() as f64 * 100.0
        })
        .unwrap_or(0.0)
}

// ============================================================================
// Parsers
// ============================================================================

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"class: (\w+)").expect("static regex"))
}

fn ping_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+\.?\d*)").expect("static regex"))
}

fn workspace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"workspace ID (-?\d+)").expect("static regex"))
}

/// First field of `/proc/loadavg`
pub fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// `usage, temperature, memory.used, memory.total` from the first GPU line
pub fn parse_nvidia_csv(text: &str) -> Option<GpuReading> {
    let line = text.lines().next()?;
    let fields: Vec<f64> = line
        .split(',')
        .map(|f| f.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    let usage = *fields.first()?;
    let temperature = fields.get(1).copied().unwrap_or(0.0);
    let memory = match (fields.get(2), fields.get(3)) {
        (Some(used), Some(total)) if *total > 0.0 => used / total * 100.0,
        _ => 0.0,
    };
    Some(GpuReading {
        usage,
        temperature,
        memory,
    })
}

pub fn parse_ping_time(text: &str) -> Option<f64> {
    ping_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn count_windows(clients: &str) -> u32 {
    clients.matches("class:").count() as u32
}

pub fn count_workspaces(workspaces: &str) -> u32 {
    workspaces.matches("workspace ID").count() as u32
}

pub fn parse_workspace_id(text: &str) -> Option<u64> {
    workspace_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(|id| id as u64)
}

/// Distinct window classes in first-seen order
pub fn application_classes(clients: &str) -> Vec<String> {
    let mut apps: Vec<String> = Vec::new();
    for cap in class_regex().captures_iter(clients) {
        let class = cap[1].to_string();
        if !apps.contains(&class) {
            apps.push(class);
        }
    }
    apps
}

fn matches_any(apps: &[String], indicators: &[&str]) -> bool {
    apps.iter().any(|app| {
        let app = app.to_ascii_lowercase();
        indicators.iter().any(|ind| app.contains(ind))
    })
}

/// Activity label with priority gaming > development > media > multitasking
/// > work > night > general.
pub fn classify_activity(apps: &[String], window_count: u32, hour: u32) -> ActivityLabel {
    if matches_any(apps, GAMING_INDICATORS) {
        ActivityLabel::Gaming
    } else if matches_any(apps, CODING_INDICATORS) {
        ActivityLabel::Development
    } else if matches_any(apps, MEDIA_INDICATORS) {
        ActivityLabel::Media
    } else if window_count > 5 {
        ActivityLabel::Multitasking
    } else if (9..=17).contains(&hour) {
        ActivityLabel::Work
    } else if hour >= 22 || hour <= 6 {
        ActivityLabel::Night
    } else {
        ActivityLabel::General
    }
}

/// Bytes read and written across whole block devices in `/proc/diskstats`.
///
/// Partitions, loop, ram and device-mapper entries are skipped so each
/// sector is counted once.
pub fn parse_diskstats(text: &str) -> (u64, u64) {
    let mut seen: Vec<String> = Vec::new();
    let mut read = 0u64;
    let mut written = 0u64;

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("dm-") {
            continue;
        }
        if seen.iter().any(|parent| name.starts_with(parent.as_str())) {
            continue;
        }
        seen.push(name.to_string());

        let sectors_read: u64 = fields[5].parse().unwrap_or(0);
        let sectors_written: u64 = fields[9].parse().unwrap_or(0);
        read += sectors_read * 512;
        written += sectors_written * 512;
    }
    (read, written)
}

/// Received and transmitted bytes over all non-loopback interfaces
pub fn parse_net_dev(text: &str) -> (u64, u64) {
    let mut recv = 0u64;
    let mut sent = 0u64;

    for line in text.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        recv += fields[0].parse::<u64>().unwrap_or(0);
        sent += fields[8].parse::<u64>().unwrap_or(0);
    }
    (recv, sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedReply, ScriptedRunner};
    use chrono::TimeZone;

    const CLIENTS: &str = "Window 55a1 -> nvim:\n\tclass: kitty\n\ttitle: nvim\n\
        Window 55a2 -> Mozilla Firefox:\n\tclass: firefox\n\ttitle: docs\n\
        Window 55a3 -> shell:\n\tclass: kitty\n";

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("0.52 0.48 0.40 1/123 4567\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn test_parse_nvidia_csv() {
        let r = parse_nvidia_csv("37, 61, 2048, 8192\n").unwrap();
        assert_eq!(r.usage, 37.0);
        assert_eq!(r.temperature, 61.0);
        assert_eq!(r.memory, 25.0);
        assert!(parse_nvidia_csv("[N/A], 40").is_none());
    }

    #[test]
    fn test_parse_ping_time() {
        let out = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=14.2 ms";
        assert_eq!(parse_ping_time(out), Some(14.2));
        assert_eq!(parse_ping_time("Request timeout"), None);
    }

    #[test]
    fn test_client_parsing() {
        assert_eq!(count_windows(CLIENTS), 3);
        assert_eq!(application_classes(CLIENTS), vec!["kitty", "firefox"]);
        assert_eq!(
            count_workspaces("workspace ID 1 (1) on monitor DP-1:\nworkspace ID 2 (2) on monitor DP-1:\n"),
            2
        );
        assert_eq!(parse_workspace_id("workspace ID 3 (3) on monitor DP-1:"), Some(3));
    }

    #[test]
    fn test_activity_priority() {
        let apps = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(classify_activity(&apps(&["Steam", "kitty"]), 1, 12), ActivityLabel::Gaming);
        assert_eq!(classify_activity(&apps(&["kitty", "mpv"]), 1, 12), ActivityLabel::Development);
        assert_eq!(classify_activity(&apps(&["mpv"]), 1, 12), ActivityLabel::Media);
        assert_eq!(classify_activity(&[], 6, 12), ActivityLabel::Multitasking);
        assert_eq!(classify_activity(&[], 2, 9), ActivityLabel::Work);
        assert_eq!(classify_activity(&[], 2, 23), ActivityLabel::Night);
        assert_eq!(classify_activity(&[], 2, 6), ActivityLabel::Night);
        assert_eq!(classify_activity(&[], 2, 19), ActivityLabel::General);
    }

    #[test]
    fn test_parse_diskstats_skips_partitions() {
        let text = "\
 259       0 nvme0n1 100 0 1000 0 50 0 2000 0 0 0 0
 259       1 nvme0n1p1 90 0 900 0 40 0 1800 0 0 0 0
   7       0 loop0 5 0 50 0 0 0 0 0 0 0 0
";
        assert_eq!(parse_diskstats(text), (1000 * 512, 2000 * 512));
    }

    #[test]
    fn test_parse_net_dev_skips_loopback() {
        let text = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 5000 10 0 0 0 0 0 0 5000 10 0 0 0 0 0 0
  wlan0: 1200 8 0 0 0 0 0 0 800 6 0 0 0 0 0 0
";
        assert_eq!(parse_net_dev(text), (1200, 800));
    }

    #[test]
    fn test_delta_starts_at_zero() {
        let mut last = None;
        assert_eq!(delta(&mut last, Some((100, 10))), (0.0, 0.0));
        assert_eq!(delta(&mut last, Some((150, 30))), (50.0, 20.0));
        assert_eq!(delta(&mut last, None), (0.0, 0.0));
    }

    #[tokio::test]
    async fn test_hyprctl_timeout_marks_compositor_unresponsive() {
        let runner = ScriptedRunner::failing().respond("hyprctl", ScriptedReply::Timeout);
        let collector = Collector::new(Arc::new(runner));
        let view = collector.compositor_view().await;
        assert!(!view.responsive);
        assert!(view.clients.is_none());
    }

    #[tokio::test]
    async fn test_context_capture_from_scripted_compositor() {
        let dir = tempfile::tempdir().unwrap();
        let bat = dir.path().join("sys/class/power_supply/BAT0");
        std::fs::create_dir_all(&bat).unwrap();
        std::fs::write(bat.join("capacity"), "42\n").unwrap();
        let backlight = dir.path().join("sys/class/backlight/intel_backlight");
        std::fs::create_dir_all(&backlight).unwrap();
        std::fs::write(backlight.join("brightness"), "300").unwrap();
        std::fs::write(backlight.join("max_brightness"), "1200").unwrap();

        let runner = ScriptedRunner::failing()
            .respond("hyprctl clients", ScriptedReply::Ok(CLIENTS.into()))
            .respond(
                "hyprctl workspaces",
                ScriptedReply::Ok("workspace ID 1 (1) on monitor DP-1:\n".into()),
            );
        let mut collector = Collector::with_root(Arc::new(runner), dir.path());

        let now = Local.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
        let ctx = collector.capture_context(now).await;
        assert_eq!(ctx.hour_of_day, 14);
        assert_eq!(ctx.day_of_week, 0);
        assert_eq!(ctx.window_count, 3);
        assert_eq!(ctx.workspace_layout, "workspaces_1");
        assert_eq!(ctx.battery_level, 42.0);
        assert_eq!(ctx.screen_brightness, 0.25);
        assert_eq!(ctx.system_load, 0.0);
        assert!(ctx.is_coding && ctx.is_media && !ctx.is_gaming);
        assert_eq!(ctx.activity, ActivityLabel::Development);
    }
}
