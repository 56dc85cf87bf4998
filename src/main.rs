use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roundkeeper::commands;
use roundkeeper::config::Config;

#[derive(Parser)]
#[command(
    name = "roundkeeper",
    version,
    about = "Round/freeze lifecycle coordinator for mention-driven ledger rounds",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the admin API until Ctrl-C
    Run,

    /// Run a single lifecycle tick
    Tick,

    /// Open a new round now, even with an empty pool
    CreateRound,

    /// Poll mentions and validate pending entries now
    SyncEntries,

    /// Request the winner draw of the ended round
    DrawWinner,

    /// Print lifecycle and endpoint status
    Status,

    /// Create database tables and indexes
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Initialize tracing/logging
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "roundkeeper starting");

    match cli.command {
        Commands::Run => commands::run(config).await?,
        Commands::Tick => commands::tick(config).await?,
        Commands::CreateRound => commands::create_round(config).await?,
        Commands::SyncEntries => commands::sync_entries(config).await?,
        Commands::DrawWinner => commands::draw_winner(config).await?,
        Commands::Status => commands::status(config).await?,
        Commands::InitDb => commands::init_db(config).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("roundkeeper=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("roundkeeper={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
