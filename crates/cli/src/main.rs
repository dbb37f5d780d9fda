//! reclaimd CLI: the main entry point.
//!
//! Commands:
//! - `daemon`  : Run the priority engine and low-memory killer
//! - `simulate`: Replay a scripted scenario against an in-memory kernel
//! - `status`  : Show live memory pressure and the active kill tier
//! - `doctor`  : Diagnose procfs access and configuration
//! - `config`  : Validate, show, or locate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "reclaimd",
    about = "reclaimd — memory-pressure arbitration daemon",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Daemon {
        /// Newline-delimited JSON lifecycle events (file or FIFO)
        #[arg(short, long)]
        events: Option<PathBuf>,
    },

    /// Replay a scenario script without touching real processes
    Simulate {
        /// Scenario script, one JSON step per line
        script: PathBuf,

        /// Free memory at the start of the run, in MB
        #[arg(long, default_value_t = 1024)]
        buffer_mb: u64,
    },

    /// Show memory pressure as the killer sees it
    Status,

    /// Diagnose system health
    Doctor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the configuration
    Validate,
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Daemon { events } => commands::daemon::run(events).await?,
        Commands::Simulate { script, buffer_mb } => {
            commands::simulate::run(script, buffer_mb).await?
        }
        Commands::Status => commands::status::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
