//! hyprtunectl - control client for hyprtuned

use anyhow::Result;
use clap::{Parser, Subcommand};
use hyprtunectl::commands::{self, CtlPaths};
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hyprtunectl")]
#[command(about = "Control the Hyprland tuning daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the daemon is running
    Status {
        /// Include scores and loop state from the daemon
        #[arg(long)]
        detailed: bool,
    },

    /// Start the daemon
    Start,

    /// Stop the daemon
    Stop,

    /// Restart the daemon
    Restart,

    /// Show the daemon log
    Logs {
        /// Keep printing new lines
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Print or save a detailed report
    Report {
        /// Write the report as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run local health checks
    Health,

    /// Ask the optimizer for an immediate run
    Optimize,

    /// Log and state file statistics
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the whole settings document
    Show,
    /// Print one dotted key
    Get { key: String },
    /// Set one dotted key
    Set { key: String, value: String },
}

async fn dispatch(command: Commands, ctx: &CtlPaths) -> Result<bool> {
    match command {
        Commands::Status { detailed } => commands::status(ctx, detailed).await,
        Commands::Start => commands::start(ctx).await,
        Commands::Stop => commands::stop(ctx).await,
        Commands::Restart => commands::restart(ctx).await,
        Commands::Logs { follow, lines } => commands::logs(ctx, follow, lines).await,
        Commands::Report { output } => commands::report(ctx, output).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(ctx),
            ConfigAction::Get { key } => commands::config_get(ctx, &key),
            ConfigAction::Set { key, value } => commands::config_set(ctx, &key, &value),
        },
        Commands::Health => commands::health(ctx).await,
        Commands::Optimize => commands::optimize(ctx).await,
        Commands::Stats => commands::stats(ctx),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ctx = CtlPaths::from_env();

    let ok = match dispatch(cli.command, &ctx).await {
        Ok(ok) => ok,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            false
        }
    };
    std::process::exit(if ok { 0 } else { 1 });
}
