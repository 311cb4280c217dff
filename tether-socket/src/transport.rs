//! Transport contract.
//!
//! The connection manager never talks to a socket library directly. It
//! drives a [`Transport`], created fresh for every connect attempt by a
//! [`TransportFactory`]. Lifecycle and event callbacks may be invoked from
//! any thread, at any time, including from inside `close()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use tether_core::config::{SocketConfig, TransportKind};
use tether_core::constants;
use tether_core::error::TetherResult;

/// Event payload carried by the transport.
pub type Payload = Value;

/// Fired when the transport finishes its handshake.
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
/// Fired when an open transport closes, with a reason string.
pub type DisconnectHandler = Arc<dyn Fn(String) + Send + Sync>;
/// Fired when the transport fails to open or fails while open.
pub type ErrorHandler = Arc<dyn Fn(TransportFault) + Send + Sync>;
/// Fired for every message received on a subscribed event name.
pub type EventHandler = Arc<dyn Fn(Payload) + Send + Sync>;
/// Fired at most once with the server's reply to a single emit.
pub type AckHandler = Box<dyn FnOnce(Payload) + Send>;

/// Error value reported through [`Transport::on_error`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFault {
    /// Structured error payload sent by the server or the client library.
    Payload(Value),
    /// Local failure with a message (I/O, handshake, timeout).
    Message(String),
}

impl TransportFault {
    /// Best-effort human-readable message.
    ///
    /// Prefers a `message` field of a structured payload, then a bare
    /// string payload, then the local message, then a fixed fallback.
    pub fn describe(&self) -> String {
        match self {
            Self::Payload(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| FALLBACK_FAULT.to_string()),
            Self::Payload(Value::String(s)) if !s.is_empty() => s.clone(),
            Self::Message(m) if !m.is_empty() => m.clone(),
            _ => FALLBACK_FAULT.to_string(),
        }
    }
}

const FALLBACK_FAULT: &str = "unknown transport error";

/// Options handed to [`Transport::open`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub kind: TransportKind,
    /// Let the transport reconnect by itself after an unexpected drop.
    pub reconnection: bool,
    /// 0 = unlimited.
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub timeout: Duration,
    pub auto_connect: bool,
    /// Headers added to the handshake request.
    pub extra_headers: HashMap<String, String>,
}

impl TransportOptions {
    pub fn from_config(config: &SocketConfig) -> Self {
        Self {
            kind: config.transport,
            reconnection: config.reconnection,
            reconnection_attempts: config.reconnection_attempts,
            reconnection_delay: config.reconnection_delay(),
            timeout: config.connect_timeout(),
            auto_connect: true,
            extra_headers: HashMap::new(),
        }
    }

    /// Attach a bearer token to the handshake.
    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.extra_headers
            .insert(constants::AUTH_HEADER.to_string(), format!("Bearer {token}"));
        self
    }
}

/// A single socket session to the server.
///
/// Implementations must tolerate `close` and `off` being called when there
/// is nothing to close or unsubscribe; they may return an error, which the
/// manager ignores.
pub trait Transport: Send {
    /// Start connecting. Must not block; the outcome arrives via callbacks.
    fn open(&mut self, endpoint: &str, options: TransportOptions) -> TetherResult<()>;

    fn close(&mut self) -> TetherResult<()>;

    fn is_open(&self) -> bool;

    fn emit(&mut self, event: &str, payload: Payload) -> TetherResult<()>;

    fn emit_with_ack(&mut self, event: &str, payload: Payload, ack: AckHandler) -> TetherResult<()>;

    /// Subscribe to a named event. Replaces any previous handler for it.
    fn on(&mut self, event: &str, handler: EventHandler) -> TetherResult<()>;

    fn off(&mut self, event: &str) -> TetherResult<()>;

    fn on_connect(&mut self, handler: ConnectHandler);

    fn on_disconnect(&mut self, handler: DisconnectHandler);

    fn on_error(&mut self, handler: ErrorHandler);
}

/// Builds a new [`Transport`] for each connect attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fault_prefers_message_field() {
        let fault = TransportFault::Payload(json!({"message": "Invalid token", "code": 401}));
        assert_eq!(fault.describe(), "Invalid token");
    }

    #[test]
    fn test_fault_string_payload_and_local_message() {
        assert_eq!(
            TransportFault::Payload(json!("server full")).describe(),
            "server full"
        );
        assert_eq!(
            TransportFault::Message("connection refused".into()).describe(),
            "connection refused"
        );
    }

    #[test]
    fn test_fault_fallback() {
        assert_eq!(TransportFault::Payload(json!({"code": 1})).describe(), FALLBACK_FAULT);
        assert_eq!(TransportFault::Payload(json!(null)).describe(), FALLBACK_FAULT);
        assert_eq!(TransportFault::Message(String::new()).describe(), FALLBACK_FAULT);
    }

    #[test]
    fn test_options_from_config() {
        let config = SocketConfig::default();
        let options = TransportOptions::from_config(&config);
        assert!(options.reconnection);
        assert_eq!(options.reconnection_attempts, 5);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert!(options.extra_headers.is_empty());

        let options = options.with_auth_token("abc");
        assert_eq!(
            options.extra_headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
    }
}
