//! mnemo - semantic memory for users, projects, and knowledge bases
//!
//! Main entry point for the mnemo CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod app;
mod commands;

use commands::{config, facts, memory, stats};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// mnemo - semantic memory for users, projects, and knowledge bases
#[derive(Parser)]
#[command(name = "mnemo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Use this config file instead of discovering one
    #[arg(long, global = true, env = "MNEMO_CONFIG")]
    pub config: Option<PathBuf>,

    /// User the memories belong to
    #[arg(short, long, global = true, env = "MNEMO_USER", default_value = "default")]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a memory
    Remember(memory::RememberArgs),

    /// Semantic search through memories
    Search(memory::SearchArgs),

    /// List memories in insertion order
    List(memory::ListArgs),

    /// Delete one memory
    Forget(memory::ForgetArgs),

    /// Delete every memory of the user
    Purge(memory::PurgeArgs),

    /// Knowledge base facts
    Facts(facts::FactsArgs),

    /// Show store statistics
    Stats(stats::StatsArgs),

    /// Configuration inspection
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
        "mnemo=debug,mnemo_service=debug,mnemo_store=debug,mnemo_embed=debug,mnemo_config=debug,info"
    } else {
        "mnemo=warn,mnemo_service=warn,mnemo_store=warn,mnemo_embed=warn,warn"
    };

    let log_dir = mnemo_config::user_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mnemo.log");
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
                    "mnemo=trace,mnemo_service=trace,mnemo_store=debug,mnemo_embed=debug,info",
                )),
        )
        .init();

    let loaded = match cli.config {
        Some(ref path) => mnemo_config::load_explicit(path)?,
        None => mnemo_config::load_config(None)?,
    };
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        user_id: cli.user,
        loaded,
    };

    match cli.command {
        Commands::Remember(args) => memory::remember(args, &ctx).await,
        Commands::Search(args) => memory::search(args, &ctx).await,
        Commands::List(args) => memory::list(args, &ctx).await,
        Commands::Forget(args) => memory::forget(args, &ctx).await,
        Commands::Purge(args) => memory::purge(args, &ctx).await,
        Commands::Facts(args) => facts::run(args, &ctx).await,
        Commands::Stats(args) => stats::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
