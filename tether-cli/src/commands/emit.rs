//! Emit command - connect, send a single event and exit.

use std::time::Duration;

use console::style;
use tokio::sync::oneshot;

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::error::{TetherError, TetherResult};
use tether_socket::SocketState;

use crate::OutputFormat;

/// Run the emit command.
pub async fn run(
    config: ConfigHandle,
    event: String,
    payload: String,
    ack: bool,
    wait_secs: u64,
    endpoint: Option<String>,
    format: OutputFormat,
) -> TetherResult<()> {
    {
        let mut cfg = config.write().await;
        if let Some(endpoint) = endpoint {
            cfg.socket.endpoint = AppConfig::sanitize_endpoint(&endpoint);
        }
        cfg.socket.auto_start = false;
        cfg.socket.show_disconnect_panel = false;
    }
    let cfg = config.read().await.clone();
    if !cfg.is_endpoint_configured() {
        return Err(TetherError::MissingConfig("socket endpoint".into()));
    }

    let wait = Duration::from_secs(wait_secs);
    let payload = super::parse_payload(&payload);
    let session = super::spawn_session(&cfg);
    let manager = session.manager.clone();

    manager.start().await;
    let settled = super::wait_for_state(&manager, wait, |s| {
        matches!(s, SocketState::Connected | SocketState::Error | SocketState::None)
    })
    .await;

    if !settled || manager.state() != SocketState::Connected {
        let state = manager.state();
        manager.shutdown().await;
        return Err(TetherError::Timeout(format!(
            "not connected after {wait_secs}s (state: {state})"
        )));
    }

    let result = if ack {
        let (tx, rx) = oneshot::channel();
        let sent = manager
            .send_with_ack(
                &event,
                payload,
                Some(Box::new(move |reply| {
                    let _ = tx.send(reply);
                })),
            )
            .await;
        if !sent {
            Err(TetherError::Transport(format!("could not send {event}")))
        } else {
            match tokio::time::timeout(wait, rx).await {
                Ok(Ok(reply)) => {
                    match format {
                        OutputFormat::Json => println!(
                            "{}",
                            serde_json::to_string_pretty(&reply).unwrap_or_default()
                        ),
                        OutputFormat::Text => {
                            println!("  {} {event} -> {reply}", style("ACK").green().bold())
                        }
                    }
                    Ok(())
                }
                Ok(Err(_)) => Err(TetherError::TransportClosed),
                Err(_) => Err(TetherError::Timeout(format!("no ack for {event} after {wait_secs}s"))),
            }
        }
    } else if manager.send(&event, payload).await {
        if let OutputFormat::Text = format {
            println!("  {} {event}", style("SENT").green().bold());
        }
        Ok(())
    } else {
        Err(TetherError::Transport(format!("could not send {event}")))
    };

    manager.disconnect_manually_silent().await;
    manager.shutdown().await;
    result
}
