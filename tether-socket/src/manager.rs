//! Connection manager.
//!
//! [`ConnectionManager`] is a cloneable handle to an actor task that owns
//! all mutable connection state: the state machine, the transport, both
//! reachability monitors, the event log and the panel flags. Public calls,
//! transport callbacks and monitor ticks are messages on one mailbox and
//! are handled strictly in arrival order, so a connect callback racing an
//! error callback can never interleave their updates.
//!
//! Transport callbacks carry the generation of the transport that produced
//! them. Replacing or resetting the transport bumps the generation, and
//! callbacks from an older generation are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tether_core::config::SocketConfig;
use tether_core::error::{TetherError, TetherResult};

use crate::event_log::{Direction, EventLog, EventLogEntry, LogSerializer, LogValue};
use crate::panel::Panel;
use crate::reachability::{
    spawn_monitor, GraceTracker, MonitorHandle, MonitorKind, MonitorTick, Observation,
    ReachabilitySource,
};
use crate::session::{token_preview, TokenSource};
use crate::state::{SocketState, StateCallback, StateMachine, SubscriptionId};
use crate::transport::{
    AckHandler, EventHandler, Payload, Transport, TransportFactory, TransportFault,
    TransportOptions,
};

/// Capacity of the received-event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback for messages on an explicitly listened event.
pub type MessageCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Host application lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The host moved to the background.
    Paused,
    /// The host returned to the foreground.
    Resumed,
}

/// A message received on any subscribed event, explicit or automatic.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub event: String,
    pub payload: Payload,
}

/// External collaborators the manager drives.
#[derive(Clone)]
pub struct ManagerDeps {
    pub transports: Arc<dyn TransportFactory>,
    pub reachability: Arc<dyn ReachabilitySource>,
    pub panel: Arc<dyn Panel>,
    pub tokens: Arc<dyn TokenSource>,
}

/// Point-in-time view of the manager, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStatus {
    pub state: SocketState,
    pub endpoint: String,
    pub is_suspended: bool,
    pub is_connecting: bool,
    pub was_socket_ever_connected: bool,
    pub has_received_game_start: bool,
    pub panel_shown_by_socket: bool,
    pub in_background: bool,
    pub has_transport: bool,
    pub transport_open: bool,
    /// Sorted.
    pub active_auto_listeners: Vec<String>,
    /// Events with explicit listeners, sorted.
    pub listeners: Vec<String>,
    pub log_entries: usize,
    pub subscribers: usize,
}

enum Command {
    Start(oneshot::Sender<()>),
    Connect(oneshot::Sender<()>),
    Disconnect {
        silent: bool,
        reply: oneshot::Sender<()>,
    },
    ResetToNone(oneshot::Sender<()>),
    SetSuspended {
        suspended: bool,
        reply: oneshot::Sender<()>,
    },
    Host {
        event: HostEvent,
        reply: oneshot::Sender<()>,
    },
    Send {
        event: String,
        payload: Payload,
        reply: oneshot::Sender<bool>,
    },
    SendWithAck {
        event: String,
        payload: Payload,
        on_ack: Option<AckHandler>,
        reply: oneshot::Sender<bool>,
    },
    Listen {
        event: String,
        callback: MessageCallback,
        replace: bool,
        reply: oneshot::Sender<bool>,
    },
    Unlisten {
        event: String,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        callback: StateCallback,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Status(oneshot::Sender<ManagerStatus>),
    EventLog(oneshot::Sender<Vec<EventLogEntry>>),
    Shutdown(oneshot::Sender<()>),

    // Posted by transport callbacks and monitors.
    TransportConnected {
        generation: u64,
    },
    TransportDisconnected {
        generation: u64,
        reason: String,
    },
    TransportError {
        generation: u64,
        fault: TransportFault,
    },
    Received {
        generation: u64,
        event: String,
        payload: Payload,
    },
    Acked {
        event: String,
        payload: Payload,
        on_ack: Option<AckHandler>,
    },
    Tick(MonitorTick),
}

/// Weak sender used by callbacks, so they never keep the actor alive.
#[derive(Clone)]
struct Mailbox(mpsc::WeakUnboundedSender<Command>);

impl Mailbox {
    fn post(&self, command: Command) -> bool {
        match self.0.upgrade() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}

/// Handle to a running connection manager.
///
/// Cloning is cheap. The actor stops when [`ConnectionManager::shutdown`] is
/// called or every handle has been dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SocketState>,
    events_tx: broadcast::Sender<ReceivedEvent>,
}

impl ConnectionManager {
    /// Spawn the manager actor. Must be called inside a tokio runtime.
    ///
    /// The active reachability monitor starts immediately, and `start()`
    /// runs right away when `config.auto_start` is set.
    pub fn spawn(config: SocketConfig, deps: ManagerDeps) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let machine = StateMachine::new();
        let state_rx = machine.watch();
        let actor = Actor::new(
            config,
            deps,
            machine,
            Mailbox(commands.downgrade()),
            events_tx.clone(),
        );
        tokio::spawn(actor.run(rx));

        Self {
            commands,
            state_rx,
            events_tx,
        }
    }

    /// Current state, as of the last processed transition.
    pub fn state(&self) -> SocketState {
        *self.state_rx.borrow()
    }

    /// A receiver that always holds the latest state.
    pub fn state_receiver(&self) -> watch::Receiver<SocketState> {
        self.state_rx.clone()
    }

    /// Stream of every received message.
    pub fn events(&self) -> broadcast::Receiver<ReceivedEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Check reachability, then connect. No-op while suspended.
    pub async fn start(&self) {
        self.run(Command::Start).await
    }

    /// Open a fresh transport. No-op while suspended, connecting or connected.
    pub async fn connect(&self) {
        self.run(Command::Connect).await
    }

    pub async fn disconnect_manually(&self) {
        self.run(|reply| Command::Disconnect {
            silent: false,
            reply,
        })
        .await
    }

    /// Disconnect without a later disconnect log line or panel.
    pub async fn disconnect_manually_silent(&self) {
        self.run(|reply| Command::Disconnect {
            silent: true,
            reply,
        })
        .await
    }

    /// Drop everything and return to `None`, forgetting any earlier connection.
    pub async fn reset_to_none_silent(&self) {
        self.run(Command::ResetToNone).await
    }

    /// Toggle suspension. Once a suspend call returns, the active monitor
    /// has no further effect.
    pub async fn set_suspended(&self, suspended: bool) {
        self.run(|reply| Command::SetSuspended { suspended, reply })
            .await
    }

    pub async fn handle_host_event(&self, event: HostEvent) {
        self.run(|reply| Command::Host { event, reply }).await
    }

    /// Emit an event. Returns false if nothing was sent.
    pub async fn send(&self, event: &str, payload: Payload) -> bool {
        let event = event.to_string();
        self.call(|reply| Command::Send {
            event,
            payload,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Emit an event and expect a reply. `on_ack` fires at most once, and
    /// never when this returns false.
    pub async fn send_with_ack(
        &self,
        event: &str,
        payload: Payload,
        on_ack: Option<AckHandler>,
    ) -> bool {
        let event = event.to_string();
        self.call(|reply| Command::SendWithAck {
            event,
            payload,
            on_ack,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Add a listener for `event` on the current transport.
    pub async fn listen(&self, event: &str, callback: MessageCallback) -> bool {
        self.listen_inner(event, callback, false).await
    }

    /// Drop every listener for `event`, then add `callback`.
    pub async fn listen_replace(&self, event: &str, callback: MessageCallback) -> bool {
        self.listen_inner(event, callback, true).await
    }

    pub async fn unlisten(&self, event: &str) {
        let event = event.to_string();
        self.run(|reply| Command::Unlisten { event, reply }).await
    }

    /// Register a callback invoked on every transition, in registration order.
    pub async fn subscribe(&self, callback: StateCallback) -> TetherResult<SubscriptionId> {
        self.call(|reply| Command::Subscribe { callback, reply }).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> TetherResult<bool> {
        self.call(|reply| Command::Unsubscribe { id, reply }).await
    }

    pub async fn status(&self) -> TetherResult<ManagerStatus> {
        self.call(Command::Status).await
    }

    /// Diagnostic log, oldest first.
    pub async fn event_log(&self) -> TetherResult<Vec<EventLogEntry>> {
        self.call(Command::EventLog).await
    }

    /// Stop monitors, close the transport and end the actor.
    pub async fn shutdown(&self) {
        self.run(Command::Shutdown).await
    }

    async fn listen_inner(&self, event: &str, callback: MessageCallback, replace: bool) -> bool {
        let event = event.to_string();
        self.call(|reply| Command::Listen {
            event,
            callback,
            replace,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> TetherResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    async fn run(&self, build: impl FnOnce(oneshot::Sender<()>) -> Command) {
        if let Err(e) = self.call(build).await {
            debug!("{e}");
        }
    }
}

fn stopped() -> TetherError {
    TetherError::Internal("connection manager is not running".to_string())
}

struct Actor {
    config: SocketConfig,
    deps: ManagerDeps,
    mailbox: Mailbox,
    events_tx: broadcast::Sender<ReceivedEvent>,
    machine: StateMachine,
    log: EventLog,

    transport: Option<Box<dyn Transport>>,
    generation: u64,

    is_suspended: bool,
    is_connecting: bool,
    was_socket_ever_connected: bool,
    has_received_game_start: bool,
    active_auto_listeners: HashSet<String>,
    /// Event names with a handler on the current transport.
    wired: HashSet<String>,
    listeners: HashMap<String, Vec<MessageCallback>>,

    panel_shown_by_socket: bool,
    loader_shown: bool,
    suppress_next_disconnect_panel: bool,
    suppress_next_disconnect_log: bool,

    in_background: bool,
    /// Set when the connection dropped while the host was paused.
    dropped_in_background: bool,
    last_auto_reconnect: Option<Instant>,

    grace: GraceTracker,
    active_monitor: Option<MonitorHandle>,
    return_monitor: Option<MonitorHandle>,
    monitor_epoch: u64,
}

impl Actor {
    fn new(
        config: SocketConfig,
        deps: ManagerDeps,
        machine: StateMachine,
        mailbox: Mailbox,
        events_tx: broadcast::Sender<ReceivedEvent>,
    ) -> Self {
        let log = EventLog::new(
            config.max_log_entries,
            LogSerializer::new(config.log_max_depth, config.log_max_items),
        );
        let grace = GraceTracker::new(config.disconnect_grace());

        Self {
            config,
            deps,
            mailbox,
            events_tx,
            machine,
            log,
            transport: None,
            generation: 0,
            is_suspended: false,
            is_connecting: false,
            was_socket_ever_connected: false,
            has_received_game_start: false,
            active_auto_listeners: HashSet::new(),
            wired: HashSet::new(),
            listeners: HashMap::new(),
            panel_shown_by_socket: false,
            loader_shown: false,
            suppress_next_disconnect_panel: false,
            suppress_next_disconnect_log: false,
            in_background: false,
            dropped_in_background: false,
            last_auto_reconnect: None,
            grace,
            active_monitor: None,
            return_monitor: None,
            monitor_epoch: 0,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            "connection manager started (endpoint: {})",
            display_endpoint(&self.config.normalized_endpoint())
        );
        self.start_active_monitor();
        if self.config.auto_start {
            self.start();
        }

        while let Some(command) = commands.recv().await {
            if !self.handle(command) {
                return;
            }
        }

        self.teardown();
        debug!("connection manager stopped: all handles dropped");
    }

    /// Returns false once the actor should exit.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Start(reply) => {
                self.start();
                let _ = reply.send(());
            }
            Command::Connect(reply) => {
                self.connect();
                let _ = reply.send(());
            }
            Command::Disconnect { silent, reply } => {
                self.disconnect_manually(silent);
                let _ = reply.send(());
            }
            Command::ResetToNone(reply) => {
                self.reset_to_none_silent();
                let _ = reply.send(());
            }
            Command::SetSuspended { suspended, reply } => {
                self.set_suspended(suspended);
                let _ = reply.send(());
            }
            Command::Host { event, reply } => {
                self.on_host_event(event);
                let _ = reply.send(());
            }
            Command::Send {
                event,
                payload,
                reply,
            } => {
                let _ = reply.send(self.send(event, payload));
            }
            Command::SendWithAck {
                event,
                payload,
                on_ack,
                reply,
            } => {
                let _ = reply.send(self.send_with_ack(event, payload, on_ack));
            }
            Command::Listen {
                event,
                callback,
                replace,
                reply,
            } => {
                let _ = reply.send(self.listen(event, callback, replace));
            }
            Command::Unlisten { event, reply } => {
                self.unwire(&event);
                let _ = reply.send(());
            }
            Command::Subscribe { callback, reply } => {
                let _ = reply.send(self.machine.subscribe(callback));
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.machine.unsubscribe(id));
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::EventLog(reply) => {
                let _ = reply.send(self.log.entries());
            }
            Command::Shutdown(reply) => {
                self.teardown();
                info!("connection manager shut down");
                let _ = reply.send(());
                return false;
            }
            Command::TransportConnected { generation } => self.on_connected(generation),
            Command::TransportDisconnected { generation, reason } => {
                self.on_disconnected(generation, reason)
            }
            Command::TransportError { generation, fault } => self.on_error(generation, fault),
            Command::Received {
                generation,
                event,
                payload,
            } => self.on_received(generation, event, payload),
            Command::Acked {
                event,
                payload,
                on_ack,
            } => {
                self.log.record(Direction::Ack, &event, &LogValue::from(&payload));
                if let Some(on_ack) = on_ack {
                    on_ack(payload);
                }
            }
            Command::Tick(tick) => self.on_tick(tick),
        }
        true
    }

    // -- Lifecycle --

    fn start(&mut self) {
        if self.is_suspended {
            debug!("start ignored: suspended");
            return;
        }
        if self.is_connecting || self.machine.current() == SocketState::Connected {
            debug!("start ignored: already {}", self.machine.current());
            return;
        }

        self.has_received_game_start = false;
        self.machine.set_state(SocketState::CheckingInternet);

        if !self.deps.reachability.is_reachable() {
            warn!("network unreachable, not connecting");
            self.machine.set_state(SocketState::None);
            return;
        }
        self.connect();
    }

    fn connect(&mut self) {
        if self.is_suspended {
            debug!("connect ignored: suspended");
            return;
        }
        if self.is_connecting || self.machine.current() == SocketState::Connected {
            debug!("connect ignored: already {}", self.machine.current());
            return;
        }

        self.has_received_game_start = false;
        self.suppress_next_disconnect_panel = false;
        self.suppress_next_disconnect_log = false;

        let endpoint = self.config.normalized_endpoint();
        if endpoint.is_empty() {
            error!("cannot connect: endpoint is not configured");
            self.machine.set_state(SocketState::Error);
            return;
        }

        self.drop_transport();
        self.generation += 1;
        let generation = self.generation;

        let mut transport = self.deps.transports.create();
        self.attach_callbacks(transport.as_mut(), generation);

        let mut options = TransportOptions::from_config(&self.config);
        match self.deps.tokens.auth_token() {
            Some(token) => {
                info!(
                    "attaching auth token (length {}, {})",
                    token.chars().count(),
                    token_preview(&token)
                );
                options = options.with_auth_token(&token);
            }
            None => debug!("no auth token, connecting anonymously"),
        }

        self.machine.set_state(SocketState::Connecting);
        self.is_connecting = true;
        if self.config.show_connecting_loader {
            self.show_loader();
        }

        info!("connecting to {endpoint} via {}", self.config.transport);
        match transport.open(&endpoint, options) {
            Ok(()) => self.transport = Some(transport),
            Err(e) => {
                if let Err(close_err) = transport.close() {
                    debug!("ignoring teardown error: {close_err}");
                }
                self.generation += 1;
                self.fail(TransportFault::Message(e.to_string()));
            }
        }
    }

    fn attach_callbacks(&self, transport: &mut dyn Transport, generation: u64) {
        let mailbox = self.mailbox.clone();
        transport.on_connect(Arc::new(move || {
            mailbox.post(Command::TransportConnected { generation });
        }));

        let mailbox = self.mailbox.clone();
        transport.on_disconnect(Arc::new(move |reason| {
            mailbox.post(Command::TransportDisconnected { generation, reason });
        }));

        let mailbox = self.mailbox.clone();
        transport.on_error(Arc::new(move |fault| {
            mailbox.post(Command::TransportError { generation, fault });
        }));
    }

    /// Close and forget the transport. Teardown errors are swallowed.
    fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("ignoring teardown error: {e}");
            }
        }
        self.wired.clear();
        self.listeners.clear();
        self.active_auto_listeners.clear();
    }

    fn disconnect_manually(&mut self, silent: bool) {
        if self.in_background {
            self.dropped_in_background = true;
        }
        if silent {
            self.suppress_next_disconnect_panel = true;
            self.suppress_next_disconnect_log = true;
        }
        self.drop_transport();
        self.is_connecting = false;
        self.has_received_game_start = false;
        if self.loader_shown {
            self.hide_panel();
        }

        let target = if self.was_socket_ever_connected {
            SocketState::Disconnected
        } else {
            SocketState::None
        };
        self.machine.set_state(target);
    }

    fn reset_to_none_silent(&mut self) {
        self.generation += 1;
        self.drop_transport();
        self.is_connecting = false;
        self.has_received_game_start = false;
        self.was_socket_ever_connected = false;
        self.suppress_next_disconnect_panel = false;
        self.suppress_next_disconnect_log = false;
        if self.loader_shown {
            self.hide_panel();
        }
        self.machine.set_state(SocketState::None);
    }

    fn set_suspended(&mut self, suspended: bool) {
        if self.is_suspended == suspended {
            return;
        }

        if suspended {
            self.is_suspended = true;
            self.stop_active_monitor();
            if self.deps.reachability.is_reachable() {
                self.hide_panel();
            } else if self.panel_shown_by_socket && self.deps.panel.is_active() {
                self.start_return_monitor();
            }
            self.reset_to_none_silent();
            info!("connection suspended");
        } else {
            self.is_suspended = false;
            self.stop_return_monitor();
            if !self.in_background {
                self.start_active_monitor();
            }
            info!("connection suspension lifted");
        }
    }

    fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Paused => {
                if self.in_background {
                    return;
                }
                self.in_background = true;
                self.dropped_in_background = false;
                self.stop_active_monitor();
                if self.config.suppress_ui_in_background {
                    self.suppress_next_disconnect_panel = true;
                    self.suppress_next_disconnect_log = true;
                }
                if !self.config.keep_alive_in_background
                    && !self.is_suspended
                    && (self.transport.is_some() || self.machine.current().is_active())
                {
                    info!("host paused, closing connection");
                    self.disconnect_manually(true);
                } else {
                    debug!("host paused");
                }
            }
            HostEvent::Resumed => {
                let was_background = std::mem::replace(&mut self.in_background, false);
                if was_background
                    && self.config.suppress_ui_in_background
                    && !self.dropped_in_background
                {
                    self.suppress_next_disconnect_panel = false;
                    self.suppress_next_disconnect_log = false;
                }
                if !self.is_suspended {
                    self.start_active_monitor();
                }
                debug!("host resumed");
                self.maybe_auto_reconnect();
            }
        }
    }

    fn maybe_auto_reconnect(&mut self) {
        if !self.config.auto_reconnect_on_resume
            || self.is_suspended
            || self.is_connecting
            || self.machine.current() == SocketState::Connected
        {
            return;
        }
        if !self.deps.reachability.is_reachable() {
            debug!("skipping auto-reconnect: network unreachable");
            return;
        }
        if let Some(last) = self.last_auto_reconnect {
            if last.elapsed() < self.config.auto_reconnect_cooldown() {
                debug!("skipping auto-reconnect: cooling down");
                return;
            }
        }

        self.last_auto_reconnect = Some(Instant::now());
        info!("auto-reconnecting after resume");
        self.connect();
    }

    fn teardown(&mut self) {
        self.stop_active_monitor();
        self.stop_return_monitor();
        self.generation += 1;
        self.drop_transport();
        self.is_connecting = false;
        self.hide_panel();
        self.machine.set_state(SocketState::None);
    }

    // -- Transport callbacks --

    fn on_connected(&mut self, generation: u64) {
        if generation != self.generation || self.transport.is_none() {
            debug!("ignoring connect from stale transport #{generation}");
            return;
        }

        self.was_socket_ever_connected = true;
        self.is_connecting = false;
        self.machine.set_state(SocketState::Connected);
        self.wire_auto_listeners();

        if self.panel_shown_by_socket && (self.config.hide_panel_on_reconnect || self.loader_shown)
        {
            self.hide_panel();
        }
    }

    fn on_disconnected(&mut self, generation: u64, reason: String) {
        if generation != self.generation {
            debug!("ignoring disconnect from stale transport #{generation}");
            return;
        }
        if self.in_background {
            self.dropped_in_background = true;
        }

        self.generation += 1;
        self.drop_transport();
        self.is_connecting = false;
        self.has_received_game_start = false;
        let suppress_panel = std::mem::take(&mut self.suppress_next_disconnect_panel);
        let suppress_log = std::mem::take(&mut self.suppress_next_disconnect_log);

        if !self.was_socket_ever_connected {
            debug!("transport closed before connecting: {reason}");
            if self.loader_shown {
                self.hide_panel();
            }
            self.machine.set_state(SocketState::None);
            return;
        }

        self.machine.set_state(SocketState::Disconnected);
        if !suppress_log {
            warn!("socket disconnected: {reason}");
        }
        if !suppress_panel && self.config.show_disconnect_panel {
            let message = self.config.disconnect_message.clone();
            self.show_error_panel(&message);
        }
    }

    fn on_error(&mut self, generation: u64, fault: TransportFault) {
        if generation != self.generation || self.transport.is_none() {
            debug!("ignoring error from stale transport #{generation}");
            return;
        }
        self.generation += 1;
        self.drop_transport();
        self.fail(fault);
    }

    fn fail(&mut self, fault: TransportFault) {
        self.is_connecting = false;
        self.active_auto_listeners.clear();
        self.has_received_game_start = false;
        self.machine.set_state(SocketState::Error);

        let message = fault.describe();
        error!(
            endpoint = %self.config.normalized_endpoint(),
            "socket error: {message}"
        );

        if self.config.show_error_panel {
            let text = format!("{}: {message}", self.config.error_label);
            self.show_error_panel(&text);
        } else if self.loader_shown {
            self.hide_panel();
        }
    }

    fn on_received(&mut self, generation: u64, event: String, payload: Payload) {
        if generation != self.generation || self.transport.is_none() {
            debug!("ignoring {event} from stale transport #{generation}");
            return;
        }

        self.log.record(Direction::Recv, &event, &LogValue::from(&payload));

        if self.machine.current() == SocketState::Connected
            && event.eq_ignore_ascii_case(&self.config.game_start_event)
        {
            if !self.has_received_game_start {
                info!("game start received");
            }
            self.has_received_game_start = true;
        }

        if let Some(callbacks) = self.listeners.get(&event) {
            for callback in callbacks {
                callback(payload.clone());
            }
        }
        // No receivers is fine.
        let _ = self.events_tx.send(ReceivedEvent { event, payload });
    }

    // -- Send / listen --

    fn can_send(&self, event: &str) -> bool {
        if self.is_suspended {
            debug!("send {event} ignored: suspended");
            return false;
        }
        if self.machine.current() != SocketState::Connected || self.transport.is_none() {
            warn!("cannot send {event}: socket is {}", self.machine.current());
            return false;
        }
        true
    }

    fn send(&mut self, event: String, payload: Payload) -> bool {
        if !self.can_send(&event) {
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        let logged = LogValue::from(&payload);
        if let Err(e) = transport.emit(&event, payload) {
            warn!("send {event} failed: {e}");
            return false;
        }
        self.log.record(Direction::Send, &event, &logged);
        true
    }

    fn send_with_ack(&mut self, event: String, payload: Payload, on_ack: Option<AckHandler>) -> bool {
        if !self.can_send(&event) {
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        let mailbox = self.mailbox.clone();
        let ack_event = event.clone();
        let ack: AckHandler = Box::new(move |payload| {
            mailbox.post(Command::Acked {
                event: ack_event,
                payload,
                on_ack,
            });
        });

        let logged = LogValue::from(&payload);
        if let Err(e) = transport.emit_with_ack(&event, payload, ack) {
            warn!("send {event} failed: {e}");
            return false;
        }
        self.log.record(Direction::Send, &event, &logged);
        true
    }

    fn listen(&mut self, event: String, callback: MessageCallback, replace: bool) -> bool {
        if self.is_suspended {
            debug!("listen {event} ignored: suspended");
            return false;
        }
        if self.transport.is_none() {
            warn!("cannot listen to {event}: no transport");
            return false;
        }

        if replace {
            self.unwire(&event);
        }
        if !self.wire(&event) {
            return false;
        }
        self.listeners.entry(event).or_default().push(callback);
        true
    }

    /// Route `event` from the current transport into the mailbox.
    fn wire(&mut self, event: &str) -> bool {
        if self.wired.contains(event) {
            return true;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        let mailbox = self.mailbox.clone();
        let generation = self.generation;
        let name = event.to_string();
        let handler: EventHandler = Arc::new(move |payload| {
            mailbox.post(Command::Received {
                generation,
                event: name.clone(),
                payload,
            });
        });

        match transport.on(event, handler) {
            Ok(()) => {
                self.wired.insert(event.to_string());
                true
            }
            Err(e) => {
                warn!("subscribe to {event} failed: {e}");
                false
            }
        }
    }

    fn unwire(&mut self, event: &str) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.off(event) {
                debug!("ignoring unsubscribe of {event}: {e}");
            }
        }
        self.wired.remove(event);
        self.listeners.remove(event);
        self.active_auto_listeners.remove(event);
    }

    fn wire_auto_listeners(&mut self) {
        let events = self.config.auto_listen_events.clone();
        for event in events {
            if self.active_auto_listeners.contains(&event) {
                continue;
            }
            if self.wire(&event) {
                self.active_auto_listeners.insert(event);
            }
        }
    }

    // -- Panel --

    fn show_error_panel(&mut self, message: &str) {
        self.deps.panel.set_active(true);
        self.deps.panel.show_error(message);
        self.panel_shown_by_socket = true;
        self.loader_shown = false;
    }

    fn show_loader(&mut self) {
        self.deps.panel.set_active(true);
        self.deps.panel.show_loader(&self.config.connecting_label);
        self.panel_shown_by_socket = true;
        self.loader_shown = true;
    }

    /// Hide the panel, but only if this manager opened it.
    fn hide_panel(&mut self) {
        if !self.panel_shown_by_socket {
            return;
        }
        self.deps.panel.hide();
        self.panel_shown_by_socket = false;
        self.loader_shown = false;
    }

    // -- Monitors --

    fn start_active_monitor(&mut self) {
        if self.active_monitor.is_some() {
            return;
        }
        self.grace.reset();
        self.active_monitor = Some(self.spawn_monitor(MonitorKind::Active));
    }

    fn stop_active_monitor(&mut self) {
        if let Some(monitor) = self.active_monitor.take() {
            monitor.stop();
        }
        self.grace.reset();
    }

    fn start_return_monitor(&mut self) {
        if self.return_monitor.is_some() {
            return;
        }
        self.return_monitor = Some(self.spawn_monitor(MonitorKind::SuspendedReturn));
    }

    fn stop_return_monitor(&mut self) {
        if let Some(monitor) = self.return_monitor.take() {
            monitor.stop();
        }
    }

    fn spawn_monitor(&mut self, kind: MonitorKind) -> MonitorHandle {
        self.monitor_epoch += 1;
        let mailbox = self.mailbox.clone();
        spawn_monitor(
            kind,
            self.monitor_epoch,
            self.config.poll_interval(),
            self.deps.reachability.clone(),
            move |tick| mailbox.post(Command::Tick(tick)),
        )
    }

    fn on_tick(&mut self, tick: MonitorTick) {
        let current = match tick.kind {
            MonitorKind::Active => &self.active_monitor,
            MonitorKind::SuspendedReturn => &self.return_monitor,
        };
        if current.as_ref().map(MonitorHandle::epoch) != Some(tick.epoch) {
            return;
        }

        match tick.kind {
            MonitorKind::Active => self.on_active_tick(tick.reachable),
            MonitorKind::SuspendedReturn => {
                if tick.reachable {
                    info!("network back while suspended, clearing panel");
                    self.hide_panel();
                    self.stop_return_monitor();
                }
            }
        }
    }

    fn on_active_tick(&mut self, reachable: bool) {
        match self.grace.observe(reachable, self.config.poll_interval()) {
            Observation::Reachable { restored: true } => {
                info!("network reachable again");
                self.hide_panel();
            }
            Observation::Unreachable {
                grace_elapsed: true,
            } if self.machine.current().is_active() => {
                warn!(
                    "network unreachable for {:?}, disconnecting",
                    self.grace.accumulated()
                );
                self.disconnect_manually(true);
                if self.config.show_no_internet_panel {
                    let message = self.config.no_internet_message.clone();
                    self.show_error_panel(&message);
                }
                self.grace.reset();
            }
            _ => {}
        }
    }

    fn status(&self) -> ManagerStatus {
        let mut active_auto_listeners: Vec<String> =
            self.active_auto_listeners.iter().cloned().collect();
        active_auto_listeners.sort();
        let mut listeners: Vec<String> = self.listeners.keys().cloned().collect();
        listeners.sort();

        ManagerStatus {
            state: self.machine.current(),
            endpoint: self.config.normalized_endpoint(),
            is_suspended: self.is_suspended,
            is_connecting: self.is_connecting,
            was_socket_ever_connected: self.was_socket_ever_connected,
            has_received_game_start: self.has_received_game_start,
            panel_shown_by_socket: self.panel_shown_by_socket,
            in_background: self.in_background,
            has_transport: self.transport.is_some(),
            transport_open: self.transport.as_ref().is_some_and(|t| t.is_open()),
            active_auto_listeners,
            listeners,
            log_entries: self.log.len(),
            subscribers: self.machine.subscriber_count(),
        }
    }
}

fn display_endpoint(endpoint: &str) -> &str {
    if endpoint.is_empty() {
        "<unset>"
    } else {
        endpoint
    }
}
