//! Command implementations for hyprtunectl
//!
//! Each command prints its own output and returns whether it succeeded;
//! `main` turns that into the exit code.

use crate::client::{daemon_reachable, HyprtunedClient};
use crate::health::{self, HealthTargets};
use crate::output;
use crate::service::{self, PidCheck, Via, SETTLE_TIMEOUT};
use crate::stats;
use anyhow::{Context, Result};
use hyprtune_common::paths::{self, DataLayout};
use hyprtune_common::{ConfigValue, DaemonStatus, DetailedReport, SettingsStore};
use owo_colors::OwoColorize;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

const FOLLOW_POLL: Duration = Duration::from_millis(500);

/// Every path the CLI touches
#[derive(Debug, Clone)]
pub struct CtlPaths {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub settings_path: PathBuf,
    pub layout: DataLayout,
}

impl CtlPaths {
    pub fn from_env() -> Self {
        Self {
            socket_path: paths::socket_path(),
            pid_file: paths::pid_file(),
            settings_path: paths::settings_path(),
            layout: DataLayout::from_env(),
        }
    }
}

// ============================================================================
// status / start / stop / restart
// ============================================================================

pub async fn status(ctx: &CtlPaths, detailed: bool) -> Result<bool> {
    output::header("Hyprland Tuning Daemon Status");

    let running = daemon_reachable(&ctx.socket_path).await;
    println!(
        "Daemon:  {}",
        if running {
            "running".green().to_string()
        } else {
            "not running".red().to_string()
        }
    );
    let unit = service::unit_state()
        .await
        .unwrap_or_else(|| "unknown".to_string());
    println!("Service: {}", unit);

    if running && detailed {
        let mut client = HyprtunedClient::connect(&ctx.socket_path).await?;
        print_status(&client.status().await?);
    }

    Ok(running)
}

fn print_status(status: &DaemonStatus) {
    output::section("Detailed Status");
    println!("Version:          {}", status.version);
    println!("State:            {}", status.state);
    println!("AI Optimizer:     {}", output::active(status.ai_optimizer_active));
    println!("Adaptive Config:  {}", output::active(status.adaptive_config_active));
    println!("Self-Healing:     {}", output::active(status.self_healing_active));
    println!("Optimizations:    {}", status.total_optimizations);
    println!("Active Issues:    {}", status.active_issues);
    println!("System Health:    {}", output::score(status.system_health_score));
    println!("Performance:      {}", output::score(status.performance_score));
    println!("Stability:        {}", output::score(status.stability_score));
    println!("Uptime:           {:.1} hours", status.uptime_hours);
}

pub async fn start(ctx: &CtlPaths) -> Result<bool> {
    if daemon_reachable(&ctx.socket_path).await {
        output::info("hyprtuned is already running");
        return Ok(true);
    }

    let spinner = output::spinner("Starting hyprtuned");
    let via = match service::start().await {
        Ok(via) => via,
        Err(e) => {
            spinner.finish_and_clear();
            output::fail(&format!("Failed to start hyprtuned: {:#}", e));
            return Ok(false);
        }
    };
    let up = service::wait_for(&ctx.socket_path, true, SETTLE_TIMEOUT).await;
    spinner.finish_and_clear();

    match (up, via) {
        (true, Via::Spawn(pid)) => output::ok(&format!("hyprtuned started (pid {})", pid)),
        (true, _) => output::ok("hyprtuned started via systemd"),
        (false, _) => output::warn("hyprtuned did not come up; check `hyprtunectl logs`"),
    }
    Ok(up)
}

pub async fn stop(ctx: &CtlPaths) -> Result<bool> {
    if !daemon_reachable(&ctx.socket_path).await {
        match service::check_pid_file(&ctx.pid_file, Path::new(service::PROC_ROOT)) {
            PidCheck::Daemon(_) => {}
            PidCheck::Missing => {
                output::info("hyprtuned is not running");
                return Ok(true);
            }
            PidCheck::Stale(pid) => {
                clear_stale_pid_file(&ctx.pid_file, pid);
                return Ok(true);
            }
        }
    }

    let spinner = output::spinner("Stopping hyprtuned");
    let via = match service::stop(&ctx.pid_file).await {
        Ok(via) => via,
        Err(e) => {
            spinner.finish_and_clear();
            output::fail(&format!("Failed to stop hyprtuned: {:#}", e));
            return Ok(false);
        }
    };
    let down = service::wait_for(&ctx.socket_path, false, SETTLE_TIMEOUT).await;
    spinner.finish_and_clear();

    if let Via::StalePidFile(pid) = via {
        output::info(&stale_pid_message(pid));
        return Ok(true);
    }

    if down {
        match via {
            Via::Signal(pid) => output::ok(&format!("hyprtuned stopped (SIGTERM to {})", pid)),
            _ => output::ok("hyprtuned stopped"),
        }
    } else {
        output::warn("hyprtuned may still be running");
    }
    Ok(down)
}

fn stale_pid_message(pid: i32) -> String {
    format!(
        "hyprtuned is not running; removed stale pid file (pid {} is not hyprtuned)",
        pid
    )
}

fn clear_stale_pid_file(pid_file: &Path, pid: i32) {
    match std::fs::remove_file(pid_file) {
        Ok(()) => output::info(&stale_pid_message(pid)),
        Err(e) => output::warn(&format!(
            "Stale pid file {} could not be removed: {}",
            pid_file.display(),
            e
        )),
    }
}

pub async fn restart(ctx: &CtlPaths) -> Result<bool> {
    if !stop(ctx).await? {
        return Ok(false);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    start(ctx).await
}

// ============================================================================
// logs
// ============================================================================

/// The last `n` lines of `text`
pub fn last_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].to_vec()
}

pub async fn logs(ctx: &CtlPaths, follow: bool, lines: usize) -> Result<bool> {
    let path = ctx.layout.log_file();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(_) => {
            output::fail(&format!("No log file at {}", path.display()));
            return Ok(false);
        }
    };

    if follow {
        println!(
            "{}",
            format!("Following {} (Ctrl+C to stop)", path.display()).dimmed()
        );
    } else {
        println!(
            "{}",
            format!("Last {} lines of {}", lines, path.display()).dimmed()
        );
    }
    for line in last_lines(&text, lines) {
        println!("{}", line);
    }

    if follow {
        follow_file(&path, text.len() as u64).await?;
    }
    Ok(true)
}

/// Print whatever is appended to `path` until Ctrl+C.
async fn follow_file(path: &Path, mut offset: u64) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Log following stopped".dimmed());
                return Ok(());
            }
            _ = tokio::time::sleep(FOLLOW_POLL) => {
                offset = print_appended(path, offset)?;
            }
        }
    }
}

/// Print bytes past `offset`; restarts from 0 when the file was rotated.
fn print_appended(path: &Path, offset: u64) -> Result<u64> {
    let Ok(mut file) = std::fs::File::open(path) else {
        return Ok(0);
    };
    let len = file.metadata()?.len();
    let start = if len < offset { 0 } else { offset };
    if len == start {
        return Ok(start);
    }
    file.seek(SeekFrom::Start(start))?;
    let mut chunk = String::new();
    file.read_to_string(&mut chunk)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    print!("{}", chunk);
    Ok(len)
}

// ============================================================================
// report / optimize
// ============================================================================

pub async fn report(ctx: &CtlPaths, output_file: Option<PathBuf>) -> Result<bool> {
    let mut client = HyprtunedClient::connect(&ctx.socket_path).await?;
    let spinner = output::spinner("Generating report");
    let report = client.report().await;
    spinner.finish_and_clear();
    let report = report?;

    match output_file {
        Some(path) => {
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(&path, json + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output::ok(&format!("Report saved to {}", path.display()));
        }
        None => print_report(&report),
    }
    Ok(true)
}

fn print_report(report: &DetailedReport) {
    output::header("System Report");
    println!("Generated: {}", report.timestamp);
    println!("State:     {}", report.orchestrator.state);
    println!("Uptime:    {:.1} hours", report.orchestrator.uptime_hours);
    let stats = &report.orchestrator.statistics;
    println!("Optimizations:    {}", stats.total_optimizations);
    println!("Adaptive Changes: {}", stats.adaptive_changes);
    println!("Healing Actions:  {}", stats.healing_actions);

    if let Some(ai) = &report.ai_optimizer {
        output::section("AI Optimizer");
        println!("  Samples:        {}", ai.samples);
        println!("  CPU Usage:      {:.1}%", ai.avg_cpu);
        println!("  Memory Usage:   {:.1}%", ai.avg_memory);
        println!("  GPU Usage:      {:.1}%", ai.avg_gpu);
        println!("  Temperature:    {:.1}°C", ai.avg_temperature);
        println!("  Training Steps: {}", ai.training_steps);
        if ai.conservative_mode {
            println!("  {}", "Conservative mode".yellow());
        }
        for rec in &ai.recommendations {
            println!("  • {}", rec);
        }
    }

    if let Some(adaptive) = &report.adaptive_config {
        output::section("Adaptive Config");
        println!(
            "  Active Profile: {}",
            adaptive.active_profile.as_deref().unwrap_or("none")
        );
        println!("  Profiles:       {}", adaptive.total_profiles);
        println!("  User Changes:   {}", adaptive.user_changes);
        println!("  Adaptations:    {}", adaptive.adaptations_applied);
        if !adaptive.top_patterns.is_empty() {
            println!("  Top Patterns:   {}", adaptive.top_patterns.join(", "));
        }
    }

    if let Some(healing) = &report.self_healing {
        output::section("Self-Healing");
        println!("  Active Issues:   {}", healing.active_issues.len());
        println!("  Resolved Issues: {}", healing.resolved_issues);
        println!("  Actions:         {}", healing.total_actions);
        println!("  Success Rate:    {}", output::score(healing.success_rate));
        for issue in &healing.active_issues {
            println!("  • [{}] {}", issue.severity, issue.title);
        }
    }
}

pub async fn optimize(ctx: &CtlPaths) -> Result<bool> {
    let mut client = HyprtunedClient::connect(&ctx.socket_path).await?;
    let ack = client.optimize().await?;
    if ack.accepted {
        output::ok(&ack.message);
    } else {
        output::fail(&ack.message);
    }
    Ok(ack.accepted)
}

// ============================================================================
// config
// ============================================================================

/// The settings file, or the install defaults when it does not exist yet
fn effective_store(path: &Path) -> Result<SettingsStore> {
    let store = SettingsStore::open(path)?;
    if store.exists() {
        Ok(store)
    } else {
        Ok(SettingsStore::with_defaults(path)?)
    }
}

pub fn config_show(ctx: &CtlPaths) -> Result<bool> {
    let store = effective_store(&ctx.settings_path)?;
    if !store.exists() {
        output::info(&format!(
            "{} does not exist; showing defaults",
            store.path().display()
        ));
    }
    println!("{}", store.to_pretty_string()?);
    Ok(true)
}

pub fn config_get(ctx: &CtlPaths, key: &str) -> Result<bool> {
    let store = effective_store(&ctx.settings_path)?;
    match store.get(key) {
        Some(value) => {
            println!("{} = {}", key, value);
            Ok(true)
        }
        None => {
            output::fail(&format!("Key '{}' not found", key));
            Ok(false)
        }
    }
}

/// Set a dotted key; refuses values the daemon could not load.
pub fn set_value(path: &Path, key: &str, raw: &str) -> Result<ConfigValue> {
    let mut store = effective_store(path)?;
    let value = ConfigValue::infer_cli(raw);
    store.set(key, value.clone())?;
    store.settings()?;
    store.save()?;
    Ok(value)
}

pub fn config_set(ctx: &CtlPaths, key: &str, raw: &str) -> Result<bool> {
    match set_value(&ctx.settings_path, key, raw) {
        Ok(value) => {
            output::ok(&format!("Set {} = {}", key, value.to_json()));
            output::info("Restart hyprtuned for the change to take effect");
            Ok(true)
        }
        Err(e) => {
            output::fail(&format!("{:#}", e));
            Ok(false)
        }
    }
}

// ============================================================================
// health / stats
// ============================================================================

pub async fn health(ctx: &CtlPaths) -> Result<bool> {
    output::header("Health Check");
    let summary = health::run_checks(&HealthTargets {
        socket_path: ctx.socket_path.clone(),
        settings_path: ctx.settings_path.clone(),
        layout: ctx.layout.clone(),
    })
    .await;

    for check in &summary.checks {
        let line = format!("{}: {}", check.name, check.detail);
        if check.passed {
            output::ok(&line);
        } else {
            output::fail(&line);
        }
    }

    println!();
    println!(
        "Health Score: {}/{} ({})",
        summary.passed(),
        summary.checks.len(),
        output::score(summary.percent())
    );
    if summary.healthy() {
        output::ok("System is healthy");
    } else if summary.percent() >= 60.0 {
        output::warn("System has minor issues");
    } else {
        output::fail("System has significant problems");
    }
    Ok(summary.healthy())
}

pub fn stats(ctx: &CtlPaths) -> Result<bool> {
    output::header("Statistics");

    let log_file = ctx.layout.log_file();
    match std::fs::read_to_string(&log_file) {
        Ok(text) => {
            let s = stats::log_stats(&text);
            println!("Log Entries:        {}", s.lines);
            println!("Optimization Lines: {}", s.optimizations);
            println!("Errors:             {}", s.errors);
            println!("Warnings:           {}", s.warnings);
        }
        Err(_) => output::info(&format!("No log file at {}", log_file.display())),
    }

    output::section("State Files");
    for (path, size) in stats::state_file_sizes(&ctx.layout) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match size {
            Some(bytes) => println!("{:<22} {}", name, output::format_bytes(bytes)),
            None => println!("{:<22} {}", name, "missing".dimmed()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_lines() {
        assert_eq!(last_lines("a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(last_lines("a\nb", 10), vec!["a", "b"]);
        assert!(last_lines("", 5).is_empty());
    }

    #[test]
    fn test_print_appended_tracks_offset_and_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("hyprtuned.log");
        std::fs::write(&log, "one\n").unwrap();
        assert_eq!(print_appended(&log, 4).unwrap(), 4);

        std::fs::write(&log, "one\ntwo\n").unwrap();
        assert_eq!(print_appended(&log, 4).unwrap(), 8);

        std::fs::write(&log, "x\n").unwrap();
        assert_eq!(print_appended(&log, 8).unwrap(), 2);
    }

    fn scratch_paths(dir: &Path) -> CtlPaths {
        CtlPaths {
            socket_path: dir.join("hyprtune.sock"),
            pid_file: dir.join("hyprtuned.pid"),
            settings_path: dir.join("settings.json"),
            layout: DataLayout::at(dir.join("data")),
        }
    }

    #[tokio::test]
    async fn test_stop_clears_pid_file_of_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = scratch_paths(dir.path());
        // This test binary is alive but is not hyprtuned
        std::fs::write(&ctx.pid_file, std::process::id().to_string()).unwrap();

        assert!(stop(&ctx).await.unwrap());
        assert!(!ctx.pid_file.exists());
    }

    #[tokio::test]
    async fn test_stop_without_daemon_or_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(stop(&scratch_paths(dir.path())).await.unwrap());
    }
}
