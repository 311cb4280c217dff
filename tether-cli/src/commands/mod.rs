//! CLI command implementations.

pub mod config;
pub mod connect;
pub mod emit;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;
use serde_json::Value;
use tracing::{debug, warn};

use tether_core::config::AppConfig;
use tether_socket::{
    ConnectionManager, EventLogEntry, ManagerDeps, Panel, ReachabilitySource, StaticReachability,
    StaticToken, TcpProbe, WebSocketTransportFactory,
};

use crate::OutputFormat;

/// Prints panel requests to the terminal.
#[derive(Default)]
pub struct ConsolePanel {
    active: AtomicBool,
}

impl Panel for ConsolePanel {
    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn show_loader(&self, label: &str) {
        println!("  {} {label}", style("...").dim());
    }

    fn show_error(&self, message: &str) {
        println!("  {} {message}", style("PANEL").red().bold());
    }

    fn hide(&self) {
        self.active.store(false, Ordering::SeqCst);
        println!("  {} panel cleared", style("PANEL").green().bold());
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// A running manager and the probe feeding its reachability.
pub struct Session {
    pub manager: ConnectionManager,
    _probe: Option<Arc<TcpProbe>>,
}

/// Spawn a manager over WebSocket with a TCP reachability probe.
///
/// Falls back to "always reachable" when no probe target can be derived,
/// so the manager reports the endpoint problem itself.
pub fn spawn_session(config: &AppConfig) -> Session {
    let socket = config.socket.clone();
    let endpoint = socket.normalized_endpoint();

    let probe = TcpProbe::spawn(&endpoint, socket.poll_interval(), socket.connect_timeout())
        .map(Arc::new);
    let reachability: Arc<dyn ReachabilitySource> = match &probe {
        Some(probe) => {
            debug!("probing reachability via {}", probe.target());
            probe.clone() as Arc<dyn ReachabilitySource>
        }
        None => {
            if !endpoint.is_empty() {
                warn!("no probe target for {endpoint}, assuming reachable");
            }
            Arc::new(StaticReachability::new(true))
        }
    };

    let deps = ManagerDeps {
        transports: Arc::new(WebSocketTransportFactory),
        reachability,
        panel: Arc::new(ConsolePanel::default()),
        tokens: Arc::new(StaticToken::new(config.session.auth_token.clone())),
    };

    Session {
        manager: ConnectionManager::spawn(socket, deps),
        _probe: probe,
    }
}

/// Parse a CLI payload argument. Invalid JSON becomes a JSON string.
pub fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Wait up to `wait` for the first state for which `done` holds.
pub async fn wait_for_state<F>(manager: &ConnectionManager, wait: Duration, done: F) -> bool
where
    F: Fn(tether_socket::SocketState) -> bool,
{
    let mut rx = manager.state_receiver();
    let watch = async {
        loop {
            if done(*rx.borrow_and_update()) {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    };
    tokio::time::timeout(wait, watch).await.unwrap_or(false)
}

/// Print the diagnostic event log.
pub fn print_event_log(entries: &[EventLogEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(entries).unwrap_or_default()
            );
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("  No events logged.");
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Time", "Dir", "Event", "Payload"]);
            for entry in entries {
                table.add_row(vec![
                    entry.timestamp.format("%H:%M:%S%.3f").to_string(),
                    entry.direction.to_string(),
                    entry.event.clone(),
                    truncate(&entry.payload, 80),
                ]);
            }
            println!("{table}");
        }
    }
}

/// Truncate a string to a maximum number of characters, appending an ellipsis if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let head: String = s.chars().take(keep).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(r#"{"table": 4}"#), serde_json::json!({"table": 4}));
        assert_eq!(parse_payload("null"), Value::Null);
        assert_eq!(parse_payload("hello there"), Value::String("hello there".into()));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }
}
