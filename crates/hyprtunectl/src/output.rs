//! Terminal output helpers

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::time::Duration;

pub fn header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(title.chars().count().max(30)));
}

pub fn section(title: &str) {
    println!();
    println!("{}", title.bold().cyan());
    println!("{}", "-".repeat(30));
}

pub fn ok(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn fail(message: &str) {
    println!("{} {}", "✗".red(), message);
}

pub fn warn(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// `Active` / `Inactive`, coloured
pub fn active(on: bool) -> String {
    if on {
        "Active".green().to_string()
    } else {
        "Inactive".red().to_string()
    }
}

/// Percentage coloured green ≥ 80, yellow ≥ 60, red below
pub fn score(value: f64) -> String {
    let text = format!("{:.1}%", value);
    if value >= 80.0 {
        text.green().to_string()
    } else if value >= 60.0 {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Spinner on a terminal, a plain line otherwise.
pub fn spinner(message: &str) -> ProgressBar {
    if !std::io::stdout().is_terminal() {
        println!("... {}", message);
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
        .template("{spinner:.cyan} {msg}")
    {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }
}
