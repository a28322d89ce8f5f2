//! Funnel CLI - Main Entry Point
//!
//! Records test outcome events into a run snapshot and turns the snapshot
//! into an interactive dashboard.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use funnel_cli::commands::{clean, record, render, serve, summary};
use funnel_common::{FunnelConfig, CONFIG_FILE};

/// Funnel - test outcome aggregation and failure dashboard
#[derive(Parser)]
#[command(name = "funnel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = CONFIG_FILE, env = "FUNNEL_CONFIG", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate test events and write the run snapshot
    Record(record::RecordArgs),

    /// Write the dashboard as a static page
    Render(render::RenderArgs),

    /// Serve the dashboard and run artifacts
    Serve(serve::ServeArgs),

    /// Print per-spec statistics of the recorded run
    Summary(summary::SummaryArgs),

    /// Stop a running dashboard and remove run output
    Clean,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = FunnelConfig::load(&cli.config)?;
    debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Record(args) => record::execute(args, &config).await?,
        Commands::Render(args) => render::execute(args, config).await?,
        Commands::Serve(args) => serve::execute(args, config).await?,
        Commands::Summary(args) => summary::execute(args, &config).await?,
        Commands::Clean => clean::execute(&config).await?,
        Commands::Version => {
            println!("Funnel CLI v{}", funnel_common::VERSION);
        }
    }

    Ok(())
}
