//! Tether CLI - drive a persistent socket connection from the terminal.
//!
//! Useful for poking at a game server by hand: watch state transitions and
//! incoming events live, fire one-off events, and manage the config file.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::error::TetherResult;
use tether_core::logging;
use tether_core::platform::Platform;

/// Tether - persistent real-time connection client.
#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Persistent real-time socket client",
    long_about = "A command-line client for event-based socket servers.\n\
                   Keeps one session alive, reports its state and logs every event."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stream state changes and events until Ctrl+C.
    Connect {
        /// Server endpoint (overrides config).
        #[arg(short, long)]
        endpoint: Option<String>,
        /// Auth token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Extra event to subscribe to on every connect. Repeatable.
        #[arg(short, long = "listen")]
        listen: Vec<String>,
        /// Save endpoint and token to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Connect, send one event and exit.
    Emit {
        /// Event name.
        event: String,
        /// JSON payload. Anything that is not valid JSON is sent as a string.
        #[arg(default_value = "null")]
        payload: String,
        /// Wait for the server's acknowledgement and print it.
        #[arg(short, long)]
        ack: bool,
        /// Seconds to wait for the connection and the ack.
        #[arg(long, default_value = "10")]
        wait: u64,
        /// Server endpoint (overrides config).
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> TetherResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    let _guard = match config.effective_log_dir() {
        Ok(dir) => match logging::init_logging(&config.logging, &dir, cli.verbose) {
            Ok(guard) => Some(guard),
            Err(e) => {
                logging::init_console_logging(&config.logging.level, cli.verbose);
                tracing::warn!("file logging unavailable: {e}");
                None
            }
        },
        Err(_) => {
            logging::init_console_logging(&config.logging.level, cli.verbose);
            None
        }
    };

    info!(
        "Tether CLI v{} on {}",
        tether_core::constants::APP_VERSION,
        Platform::current()
    );

    let config_handle = ConfigHandle::new(config).with_path(config_path);

    match cli.command {
        Commands::Connect {
            endpoint,
            token,
            listen,
            save,
        } => commands::connect::run(config_handle, endpoint, token, listen, save, cli.format).await,
        Commands::Emit {
            event,
            payload,
            ack,
            wait,
            endpoint,
        } => commands::emit::run(config_handle, event, payload, ack, wait, endpoint, cli.format).await,
        Commands::Config { action } => commands::config::run(config_handle, action, cli.format).await,
    }
}
