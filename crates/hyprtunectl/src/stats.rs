//! Numbers for `hyprtunectl stats`: log line counts and state file sizes.

use hyprtune_common::paths::DataLayout;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub lines: usize,
    pub errors: usize,
    pub warnings: usize,
    pub optimizations: usize,
}

/// Level column of a `tracing-subscriber` fmt line
fn level_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\S+\s+(ERROR|WARN)\s").expect("valid level pattern"))
}

pub fn log_stats(text: &str) -> LogStats {
    let mut stats = LogStats::default();
    for line in text.lines() {
        stats.lines += 1;
        if let Some(caps) = level_pattern().captures(line) {
            match &caps[1] {
                "ERROR" => stats.errors += 1,
                _ => stats.warnings += 1,
            }
        }
        if line.to_ascii_lowercase().contains("optimiz") {
            stats.optimizations += 1;
        }
    }
    stats
}

/// Size of each state file; `None` for files not created yet
pub fn state_file_sizes(layout: &DataLayout) -> Vec<(PathBuf, Option<u64>)> {
    layout
        .state_files()
        .into_iter()
        .map(|path| {
            let size = std::fs::metadata(&path).ok().map(|m| m.len());
            (path, size)
        })
        .collect()
}
