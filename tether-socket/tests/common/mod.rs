//! Shared test utilities for integration tests.
//!
//! `MockNetwork` is a transport factory whose transports do nothing on
//! their own: tests fire connect/disconnect/error callbacks and incoming
//! events by hand, then call [`settle`] so the manager has processed them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use tether_core::config::SocketConfig;
use tether_core::error::{TetherError, TetherResult};
use tether_socket::transport::{ConnectHandler, DisconnectHandler, ErrorHandler, EventHandler};
use tether_socket::{
    AckHandler, ConnectionManager, ManagerDeps, ManagerStatus, Panel, Payload, SocketState,
    StaticReachability, StaticToken, Transport, TransportFactory, TransportFault,
    TransportOptions,
};

/// Everything one mock transport has seen.
#[derive(Default)]
pub struct MockState {
    pub endpoint: Option<String>,
    pub options: Option<TransportOptions>,
    pub open: bool,
    pub close_calls: usize,
    pub emits: Vec<(String, Value)>,
    pub pending_acks: Vec<(String, AckHandler)>,
    pub handlers: HashMap<String, EventHandler>,
    pub on_calls: Vec<String>,
    pub off_calls: Vec<String>,
    connect: Option<ConnectHandler>,
    disconnect: Option<DisconnectHandler>,
    error: Option<ErrorHandler>,
    fail_open: bool,
    disconnect_on_close: bool,
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Transport for MockTransport {
    fn open(&mut self, endpoint: &str, options: TransportOptions) -> TetherResult<()> {
        let mut state = self.state.lock().unwrap();
        state.endpoint = Some(endpoint.to_string());
        state.options = Some(options);
        if state.fail_open {
            return Err(TetherError::Transport("refused".into()));
        }
        Ok(())
    }

    fn close(&mut self) -> TetherResult<()> {
        let callback = {
            let mut state = self.state.lock().unwrap();
            state.close_calls += 1;
            let was_open = std::mem::replace(&mut state.open, false);
            if !was_open {
                return Err(TetherError::TransportClosed);
            }
            state.disconnect.clone().filter(|_| state.disconnect_on_close)
        };
        if let Some(callback) = callback {
            callback("io client disconnect".to_string());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn emit(&mut self, event: &str, payload: Payload) -> TetherResult<()> {
        self.state
            .lock()
            .unwrap()
            .emits
            .push((event.to_string(), payload));
        Ok(())
    }

    fn emit_with_ack(&mut self, event: &str, payload: Payload, ack: AckHandler) -> TetherResult<()> {
        let mut state = self.state.lock().unwrap();
        state.emits.push((event.to_string(), payload));
        state.pending_acks.push((event.to_string(), ack));
        Ok(())
    }

    fn on(&mut self, event: &str, handler: EventHandler) -> TetherResult<()> {
        let mut state = self.state.lock().unwrap();
        state.on_calls.push(event.to_string());
        state.handlers.insert(event.to_string(), handler);
        Ok(())
    }

    fn off(&mut self, event: &str) -> TetherResult<()> {
        let mut state = self.state.lock().unwrap();
        state.off_calls.push(event.to_string());
        match state.handlers.remove(event) {
            Some(_) => Ok(()),
            None => Err(TetherError::ListenerNotFound(event.to_string())),
        }
    }

    fn on_connect(&mut self, handler: ConnectHandler) {
        self.state.lock().unwrap().connect = Some(handler);
    }

    fn on_disconnect(&mut self, handler: DisconnectHandler) {
        self.state.lock().unwrap().disconnect = Some(handler);
    }

    fn on_error(&mut self, handler: ErrorHandler) {
        self.state.lock().unwrap().error = Some(handler);
    }
}

/// Test-side view of one mock transport.
#[derive(Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn fire_connect(&self) {
        let callback = {
            let mut state = self.0.lock().unwrap();
            state.open = true;
            state.connect.clone()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn fire_disconnect(&self, reason: &str) {
        let callback = {
            let mut state = self.0.lock().unwrap();
            state.open = false;
            state.disconnect.clone()
        };
        if let Some(callback) = callback {
            callback(reason.to_string());
        }
    }

    pub fn fire_error(&self, fault: TransportFault) {
        let callback = self.0.lock().unwrap().error.clone();
        if let Some(callback) = callback {
            callback(fault);
        }
    }

    /// Deliver a server message. Returns false if nothing is subscribed.
    pub fn deliver(&self, event: &str, payload: Value) -> bool {
        let handler = self.0.lock().unwrap().handlers.get(event).cloned();
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    /// Answer the oldest pending ack.
    pub fn answer_ack(&self, payload: Value) -> bool {
        let pending = {
            let mut state = self.0.lock().unwrap();
            if state.pending_acks.is_empty() {
                None
            } else {
                Some(state.pending_acks.remove(0))
            }
        };
        match pending {
            Some((_, ack)) => {
                ack(payload);
                true
            }
            None => false,
        }
    }

    pub fn emits(&self) -> Vec<(String, Value)> {
        self.0.lock().unwrap().emits.clone()
    }

    pub fn on_calls(&self) -> Vec<String> {
        self.0.lock().unwrap().on_calls.clone()
    }

    pub fn off_calls(&self) -> Vec<String> {
        self.0.lock().unwrap().off_calls.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.0.lock().unwrap().close_calls
    }

    pub fn endpoint(&self) -> Option<String> {
        self.0.lock().unwrap().endpoint.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let state = self.0.lock().unwrap();
        state
            .options
            .as_ref()
            .and_then(|o| o.extra_headers.get(name).cloned())
    }
}

/// Transport factory recording every transport it hands out.
#[derive(Clone, Default)]
pub struct MockNetwork {
    created: Arc<Mutex<Vec<MockHandle>>>,
    fail_open: Arc<AtomicBool>,
    disconnect_on_close: Arc<AtomicBool>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `open` calls fail synchronously.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `close` on an open transport fire its disconnect callback.
    pub fn set_disconnect_on_close(&self, enabled: bool) {
        self.disconnect_on_close.store(enabled, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> MockHandle {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> MockHandle {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }
}

impl TransportFactory for MockNetwork {
    fn create(&self) -> Box<dyn Transport> {
        let state = Arc::new(Mutex::new(MockState {
            fail_open: self.fail_open.load(Ordering::SeqCst),
            disconnect_on_close: self.disconnect_on_close.load(Ordering::SeqCst),
            ..Default::default()
        }));
        self.created.lock().unwrap().push(MockHandle(state.clone()));
        Box::new(MockTransport { state })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelCall {
    SetActive(bool),
    Loader(String),
    Error(String),
    Hide,
}

/// Panel that records every request.
#[derive(Default)]
pub struct RecordingPanel {
    calls: Mutex<Vec<PanelCall>>,
    active: AtomicBool,
}

impl RecordingPanel {
    pub fn calls(&self) -> Vec<PanelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PanelCall::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn hides(&self) -> usize {
        self.calls().iter().filter(|c| **c == PanelCall::Hide).count()
    }

    /// Open the panel on behalf of someone other than the manager.
    pub fn open_externally(&self) {
        self.active.store(true, Ordering::SeqCst);
    }
}

impl Panel for RecordingPanel {
    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(PanelCall::SetActive(active));
    }

    fn show_loader(&self, label: &str) {
        self.calls.lock().unwrap().push(PanelCall::Loader(label.to_string()));
    }

    fn show_error(&self, message: &str) {
        self.calls.lock().unwrap().push(PanelCall::Error(message.to_string()));
    }

    fn hide(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.calls.lock().unwrap().push(PanelCall::Hide);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub const TEST_ENDPOINT: &str = "http://localhost:3000";

/// Socket config pointing at a local endpoint, without auto-start.
pub fn create_test_config() -> SocketConfig {
    SocketConfig {
        endpoint: TEST_ENDPOINT.to_string(),
        auto_start: false,
        ..Default::default()
    }
}

/// A manager wired to mocks, plus a log of every state transition.
pub struct Harness {
    pub manager: ConnectionManager,
    pub network: MockNetwork,
    pub panel: Arc<RecordingPanel>,
    pub reachability: StaticReachability,
    pub states: Arc<Mutex<Vec<SocketState>>>,
}

impl Harness {
    pub async fn new(config: SocketConfig) -> Self {
        Self::with_token(config, StaticToken::none()).await
    }

    pub async fn with_token(config: SocketConfig, token: StaticToken) -> Self {
        let network = MockNetwork::new();
        let panel = Arc::new(RecordingPanel::default());
        let reachability = StaticReachability::new(true);

        let manager = ConnectionManager::spawn(
            config,
            ManagerDeps {
                transports: Arc::new(network.clone()),
                reachability: Arc::new(reachability.clone()),
                panel: panel.clone(),
                tokens: Arc::new(token),
            },
        );

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        manager
            .subscribe(Arc::new(move |state: SocketState| sink.lock().unwrap().push(state)))
            .await
            .expect("manager running");

        Self {
            manager,
            network,
            panel,
            reachability,
            states,
        }
    }

    /// Start and complete the handshake on the new transport.
    pub async fn connected(config: SocketConfig) -> Self {
        let harness = Self::new(config).await;
        harness.manager.start().await;
        harness.network.latest().fire_connect();
        harness.settle().await;
        harness
    }

    /// Wait until every callback fired so far has been processed.
    pub async fn settle(&self) -> ManagerStatus {
        self.manager.status().await.expect("manager running")
    }

    pub fn states(&self) -> Vec<SocketState> {
        self.states.lock().unwrap().clone()
    }

    pub fn clear_states(&self) {
        self.states.lock().unwrap().clear();
    }
}
