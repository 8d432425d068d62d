//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a session against a simulated data source and print its metrics
    Simulate {
        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of distinct addresses
        #[arg(long, default_value_t = 64)]
        addresses: u32,

        /// Number of invalidation events to push
        #[arg(long, default_value_t = 200)]
        events: u32,

        /// Addresses treated as visible
        #[arg(long, default_value_t = 8)]
        viewport: u32,

        /// Probability that a fetch fails
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,

        /// Simulated fetch latency in milliseconds
        #[arg(long, default_value_t = 5)]
        latency_ms: u64,

        /// Simulate a reconnection halfway through
        #[arg(long)]
        reconnect: bool,

        /// Print metrics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the default configuration
    Show,

    /// Check a configuration file
    Validate {
        /// Path to configuration file
        #[arg(default_value = "canto.yaml")]
        path: PathBuf,
    },
}
