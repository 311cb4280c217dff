//! Socket state and the state machine that owns it.
//!
//! The machine has no transition table: any state may move to any other.
//! Policy lives in the connection manager, which is the only writer.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Health of the socket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SocketState {
    /// Idle. Nothing was ever connected, or the manager was reset.
    #[default]
    None,
    /// Sampling reachability before a connect attempt.
    CheckingInternet,
    /// Transport opened, waiting for its connect callback.
    Connecting,
    /// Session established.
    Connected,
    /// An established session dropped.
    Disconnected,
    /// Misconfiguration or a transport error.
    Error,
}

impl SocketState {
    /// States in which losing the network should end the session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Connecting | Self::CheckingInternet
        )
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::CheckingInternet => write!(f, "checking_internet"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Callback invoked synchronously on every state change.
pub type StateCallback = Arc<dyn Fn(SocketState) + Send + Sync>;

/// Handle returned by [`StateMachine::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Holds the current [`SocketState`] and notifies observers of changes.
///
/// Observers are called in registration order, on the caller's thread,
/// before `set_state` returns. They must not block for long.
pub struct StateMachine {
    current: SocketState,
    subscribers: Vec<(SubscriptionId, StateCallback)>,
    next_id: u64,
    watch_tx: watch::Sender<SocketState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(SocketState::None);
        Self {
            current: SocketState::None,
            subscribers: Vec::new(),
            next_id: 1,
            watch_tx,
        }
    }

    pub fn current(&self) -> SocketState {
        self.current
    }

    /// Move to `new_state`. Returns false (and notifies nobody) if already there.
    pub fn set_state(&mut self, new_state: SocketState) -> bool {
        if self.current == new_state {
            return false;
        }
        info!("socket state: {} -> {}", self.current, new_state);
        self.current = new_state;
        self.watch_tx.send_replace(new_state);
        for (_, callback) in &self.subscribers {
            callback(new_state);
        }
        true
    }

    pub fn subscribe(&mut self, callback: StateCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, callback));
        id
    }

    /// Remove an observer. Returns false if the id was unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// A receiver that always holds the latest state.
    pub fn watch(&self) -> watch::Receiver<SocketState> {
        self.watch_tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
