//! nudge - error-pattern memory and tiered reminder routing
//!
//! Main entry point for the nudge CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{cluster, config, patterns, reload, route, stats, watch};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// nudge - remembers how answers go wrong and reminds the model before it answers
#[derive(Parser)]
#[command(name = "nudge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml (default: platform config dir)
    #[arg(long, global = true, env = "NUDGE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Directory holding patterns, index, cache and weakness catalog
    #[arg(long, global = true, env = "NUDGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pick the reminders for a question
    Route(route::RouteArgs),

    /// Show pattern store and catalog statistics
    Stats(stats::StatsArgs),

    /// Validate the on-disk snapshot and report what it holds
    Reload(reload::ReloadArgs),

    /// Add, import, list and remove error patterns
    Patterns(patterns::PatternsArgs),

    /// Group patterns into clusters and pick representatives
    Cluster(cluster::ClusterArgs),

    /// Reload on file changes until interrupted
    Watch(watch::WatchArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "nudge=debug,nudge_router=debug,nudge_memory=debug,nudge_llm=debug,nudge_config=debug,info"
    } else {
        "nudge=info,nudge_router=warn,nudge_memory=warn,nudge_llm=warn,warn"
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(nudge_config::user_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "nudge.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "nudge=trace,nudge_router=trace,nudge_memory=trace,nudge_llm=trace,nudge_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config_dir: cli.config_dir,
        data_dir: cli.data_dir,
    };

    match cli.command {
        Commands::Route(args) => route::run(args, &ctx).await,
        Commands::Stats(args) => stats::run(args, &ctx).await,
        Commands::Reload(args) => reload::run(args, &ctx).await,
        Commands::Patterns(args) => patterns::run(args, &ctx).await,
        Commands::Cluster(args) => cluster::run(args, &ctx).await,
        Commands::Watch(args) => watch::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
