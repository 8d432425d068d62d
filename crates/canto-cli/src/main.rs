//! Canto CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;
mod simulation;

use commands::{Commands, ConfigCommands};

#[derive(Parser)]
#[command(name = "canto")]
#[command(author, version, about = "Canto rendering cache tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            addresses,
            events,
            viewport,
            failure_rate,
            latency_ms,
            reconnect,
            json,
        } => {
            let options = simulation::SimulationOptions {
                addresses,
                events,
                viewport,
                failure_rate,
                latency_ms,
                reconnect,
            };
            handlers::simulate(config.as_deref(), options, json).await?
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config()?,
            ConfigCommands::Validate { path } => handlers::validate_config(&path)?,
        },
    }

    Ok(())
}
