//! Config commands.

use clap::Subcommand;
use console::style;

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::error::{TetherError, TetherResult};
use tether_socket::token_preview;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration (token redacted).
    Show,
    /// Print the configuration file path.
    Path,
    /// Write a default configuration file.
    Init {
        /// Server endpoint to store.
        #[arg(short, long)]
        endpoint: Option<String>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub async fn run(config: ConfigHandle, action: ConfigAction, format: OutputFormat) -> TetherResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = redacted(&*config.read().await);
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&cfg)?);
                }
                OutputFormat::Text => {
                    let text = toml::to_string_pretty(&cfg)
                        .map_err(|e| TetherError::Serialization(e.to_string()))?;
                    println!("{text}");
                }
            }
        }
        ConfigAction::Path => {
            let path = match config.path() {
                Some(path) => path.to_path_buf(),
                None => AppConfig::default_config_path()?,
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "path": path })),
                OutputFormat::Text => println!("{}", path.display()),
            }
        }
        ConfigAction::Init { endpoint, force } => {
            let exists = config.path().is_some_and(|p| p.exists());
            if exists && !force {
                return Err(TetherError::Config(
                    "config file already exists (use --force to overwrite)".into(),
                ));
            }
            {
                let mut cfg = config.write().await;
                *cfg = AppConfig::default();
                if let Some(endpoint) = endpoint {
                    cfg.socket.endpoint = AppConfig::sanitize_endpoint(&endpoint);
                }
            }
            let path = config.save().await?;
            println!("  {} Config written to {}", style("OK").green(), path.display());
        }
    }
    Ok(())
}

fn redacted(cfg: &AppConfig) -> AppConfig {
    let mut cfg = cfg.clone();
    if !cfg.session.auth_token.is_empty() {
        cfg.session.auth_token = token_preview(&cfg.session.auth_token);
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_hides_token() {
        let mut cfg = AppConfig::default();
        cfg.session.auth_token = "abcdefghij1234567890".into();
        assert_eq!(redacted(&cfg).session.auth_token, "abcdefghij...567890");

        cfg.session.auth_token.clear();
        assert!(redacted(&cfg).session.auth_token.is_empty());
    }
}
