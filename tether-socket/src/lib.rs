//! Tether Socket - persistent real-time connection management.
//!
//! This crate provides:
//! - [`ConnectionManager`], an actor that owns one logical socket session,
//!   its state machine, reachability monitors and panel requests
//! - The [`Transport`] contract and a WebSocket implementation
//! - Bounded diagnostic event logging
//! - Reachability sources (manual flag, TCP probe)

pub mod event_log;
pub mod manager;
pub mod panel;
pub mod reachability;
pub mod session;
pub mod state;
pub mod transport;
pub mod ws;

// Re-export key types
pub use event_log::{Direction, EventLog, EventLogEntry, LogSerializer, LogValue};
pub use manager::{
    ConnectionManager, HostEvent, ManagerDeps, ManagerStatus, MessageCallback, ReceivedEvent,
};
pub use panel::{LogPanel, Panel};
pub use reachability::{ReachabilitySource, StaticReachability, TcpProbe};
pub use session::{token_preview, StaticToken, TokenSource};
pub use state::{SocketState, StateCallback, SubscriptionId};
pub use transport::{
    AckHandler, Payload, Transport, TransportFactory, TransportFault, TransportOptions,
};
pub use ws::{WebSocketTransport, WebSocketTransportFactory};
