//! Connect command - hold a session open and stream what happens.

use std::sync::Arc;

use console::style;
use dialoguer::Input;
use tokio::sync::broadcast::error::RecvError;

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::error::{TetherError, TetherResult};
use tether_socket::{token_preview, SocketState};

use crate::OutputFormat;

/// Run the connect command.
pub async fn run(
    config: ConfigHandle,
    endpoint: Option<String>,
    token: Option<String>,
    listen: Vec<String>,
    save_config: bool,
    format: OutputFormat,
) -> TetherResult<()> {
    // Determine endpoint: arg > config > interactive prompt
    let endpoint = match endpoint {
        Some(e) => e,
        None => {
            let current = config.read().await.socket.endpoint.clone();
            if current.trim().is_empty() {
                Input::new()
                    .with_prompt("Server endpoint")
                    .interact_text()
                    .map_err(|e| TetherError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    {
        let mut cfg = config.write().await;
        cfg.socket.endpoint = AppConfig::sanitize_endpoint(&endpoint);
        cfg.socket.auto_start = false;
        if let Some(token) = token {
            cfg.session.auth_token = token;
        }
        for event in listen {
            if !cfg.socket.auto_listen_events.contains(&event) {
                cfg.socket.auto_listen_events.push(event);
            }
        }
    }

    if save_config {
        let path = config.save().await?;
        println!("  {} Config saved to {}", style("OK").green(), path.display());
    }

    let cfg = config.read().await.clone();
    if !cfg.is_endpoint_configured() {
        return Err(TetherError::MissingConfig("socket endpoint".into()));
    }

    println!(
        "{} Connecting to {}...",
        style("[1/2]").bold().dim(),
        cfg.socket.normalized_endpoint()
    );
    if !cfg.session.auth_token.is_empty() {
        println!("  Token:   {}", token_preview(&cfg.session.auth_token));
    }
    println!("  Events:  {}", cfg.socket.auto_listen_events.join(", "));

    let session = super::spawn_session(&cfg);
    let manager = session.manager.clone();
    let mut states = manager.state_receiver();
    let mut events = manager.events();

    manager
        .subscribe(Arc::new(|state: SocketState| {
            tracing::debug!("state callback: {state}");
        }))
        .await?;
    manager.start().await;

    println!(
        "{} Streaming state and events... (Ctrl+C to stop)",
        style("[2/2]").bold().dim(),
    );
    println!();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("  {} {}", style("STATE").magenta().bold(), style_state(state));
            }
            event = events.recv() => {
                match event {
                    Ok(ev) => {
                        println!(
                            "  {} {}",
                            style(format!("[{}]", ev.event)).cyan(),
                            ev.payload
                        );
                    }
                    Err(RecvError::Lagged(n)) => {
                        println!(
                            "  {} Missed {n} events (slow consumer)",
                            style("WARN").yellow()
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Disconnecting...");
                manager.disconnect_manually_silent().await;
                break;
            }
        }
    }

    let log = manager.event_log().await.unwrap_or_default();
    println!();
    super::print_event_log(&log, format);
    manager.shutdown().await;

    Ok(())
}

fn style_state(state: SocketState) -> console::StyledObject<String> {
    let text = state.to_string();
    match state {
        SocketState::Connected => style(text).green().bold(),
        SocketState::Error | SocketState::Disconnected => style(text).red(),
        SocketState::Connecting | SocketState::CheckingInternet => style(text).yellow(),
        SocketState::None => style(text).dim(),
    }
}
