//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Frames are JSON text messages:
//! - event: `{"event": "joinGame", "data": {...}}`
//! - event expecting a reply: `{"event": "joinGame", "data": {...}, "id": 3}`
//! - reply from the server: `{"ack": 3, "data": {...}}`
//!
//! An incoming `error` event is reported through the error callback rather
//! than to a subscribed handler. When reconnection is enabled the session
//! task redials with exponential backoff and jitter after an unexpected
//! drop, reporting each drop and each failed dial through the callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::config::TransportKind;
use tether_core::error::{TetherError, TetherResult};

use crate::transport::{
    AckHandler, ConnectHandler, DisconnectHandler, ErrorHandler, EventHandler, Payload,
    Transport, TransportFactory, TransportFault, TransportOptions,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for the backoff between redials.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Jitter factor (0.0 to 1.0) applied to each redial delay.
const RECONNECT_JITTER: f64 = 0.3;

/// Reason reported when the client closes the session itself.
pub const CLIENT_CLOSE_REASON: &str = "io client disconnect";

/// Wire envelope for every frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

/// Redial delay for the given zero-based attempt.
///
/// Sequence: base, 2x, 4x, ... capped at 30s, with +/- 30% jitter and a
/// floor of half the base delay.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let base = base.as_secs_f64();
    let max = MAX_RECONNECT_DELAY.as_secs_f64().max(base);

    let exponential = (base * 2.0_f64.powi(attempt.min(30) as i32)).min(max);

    let jitter_range = exponential * RECONNECT_JITTER;
    let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
    let delay = (exponential + jitter).max(base / 2.0);

    Duration::from_secs_f64(delay)
}

/// Map an http(s) endpoint onto the matching ws(s) URL.
pub fn websocket_url(endpoint: &str) -> TetherResult<String> {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Ok(endpoint.to_string())
    } else {
        Err(TetherError::Config(format!("unsupported endpoint scheme: {endpoint}")))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the transport handle and its session task.
#[derive(Default)]
struct Shared {
    open: AtomicBool,
    handlers: Mutex<HashMap<String, EventHandler>>,
    acks: Mutex<HashMap<u64, AckHandler>>,
    next_ack: AtomicU64,
}

impl Shared {
    fn dispatch(&self, text: &str, callbacks: &Callbacks) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("ignoring malformed frame: {e}");
                return;
            }
        };

        if let Some(id) = envelope.ack {
            let ack = lock(&self.acks).remove(&id);
            match ack {
                Some(ack) => ack(envelope.data),
                None => debug!("ack #{id} has no pending emit"),
            }
            return;
        }

        let Some(event) = envelope.event else {
            debug!("ignoring frame without event name");
            return;
        };

        if event == "error" {
            callbacks.error(TransportFault::Payload(envelope.data));
            return;
        }

        let handler = lock(&self.handlers).get(&event).cloned();
        match handler {
            Some(handler) => handler(envelope.data),
            None => debug!("no handler for event {event}"),
        }
    }
}

/// Lifecycle callbacks, cloned into the session task on open.
#[derive(Clone, Default)]
struct Callbacks {
    connect: Option<ConnectHandler>,
    disconnect: Option<DisconnectHandler>,
    error: Option<ErrorHandler>,
}

impl Callbacks {
    fn connected(&self) {
        if let Some(cb) = &self.connect {
            cb();
        }
    }

    fn disconnected(&self, reason: String) {
        if let Some(cb) = &self.disconnect {
            cb(reason);
        }
    }

    fn error(&self, fault: TransportFault) {
        if let Some(cb) = &self.error {
            cb(fault);
        }
    }
}

/// Why a live session ended.
#[derive(Debug)]
enum SessionEnd {
    /// `close()` was called or the transport was dropped.
    ClientClose,
    /// The server closed the socket.
    ServerClose(String),
    /// Read or write failed.
    Failed(String),
}

/// A [`Transport`] speaking JSON envelopes over a WebSocket.
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    callbacks: Callbacks,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            callbacks: Callbacks::default(),
            outgoing: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    fn send_envelope(&self, envelope: &Envelope) -> TetherResult<()> {
        if !self.is_open() {
            return Err(TetherError::TransportClosed);
        }
        let text = serde_json::to_string(envelope)?;
        let outgoing = self.outgoing.as_ref().ok_or(TetherError::TransportClosed)?;
        outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| TetherError::TransportClosed)
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, endpoint: &str, options: TransportOptions) -> TetherResult<()> {
        if self.task.is_some() {
            return Err(TetherError::Transport("transport already opened".into()));
        }
        let url = websocket_url(endpoint)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TetherError::Transport(format!("no async runtime: {e}")))?;

        if options.kind == TransportKind::Polling {
            debug!("polling transport requested, using websocket");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);
        self.cancel = CancellationToken::new();

        let task = runtime.spawn(run_session(
            url,
            options,
            self.shared.clone(),
            self.callbacks.clone(),
            rx,
            self.cancel.clone(),
        ));
        self.task = Some(task);
        Ok(())
    }

    fn close(&mut self) -> TetherResult<()> {
        self.cancel.cancel();
        self.outgoing = None;
        self.task = None;
        lock(&self.shared.acks).clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn emit(&mut self, event: &str, payload: Payload) -> TetherResult<()> {
        self.send_envelope(&Envelope {
            event: Some(event.to_string()),
            data: payload,
            ..Default::default()
        })
    }

    fn emit_with_ack(&mut self, event: &str, payload: Payload, ack: AckHandler) -> TetherResult<()> {
        let id = self.shared.next_ack.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.shared.acks).insert(id, ack);
        let result = self.send_envelope(&Envelope {
            event: Some(event.to_string()),
            data: payload,
            id: Some(id),
            ..Default::default()
        });
        if result.is_err() {
            lock(&self.shared.acks).remove(&id);
        }
        result
    }

    fn on(&mut self, event: &str, handler: EventHandler) -> TetherResult<()> {
        lock(&self.shared.handlers).insert(event.to_string(), handler);
        Ok(())
    }

    fn off(&mut self, event: &str) -> TetherResult<()> {
        match lock(&self.shared.handlers).remove(event) {
            Some(_) => Ok(()),
            None => Err(TetherError::ListenerNotFound(event.to_string())),
        }
    }

    fn on_connect(&mut self, handler: ConnectHandler) {
        self.callbacks.connect = Some(handler);
    }

    fn on_disconnect(&mut self, handler: DisconnectHandler) {
        self.callbacks.disconnect = Some(handler);
    }

    fn on_error(&mut self, handler: ErrorHandler) {
        self.callbacks.error = Some(handler);
    }
}

/// Builds a fresh [`WebSocketTransport`] per connect attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(WebSocketTransport::new())
    }
}

async fn dial(url: &str, options: &TransportOptions) -> Result<WsStream, TransportFault> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportFault::Message(format!("invalid endpoint: {e}")))?;

    for (name, value) in &options.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportFault::Message(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportFault::Message(format!("invalid header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    match tokio::time::timeout(options.timeout, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(TransportFault::Message(e.to_string())),
        Err(_) => Err(TransportFault::Message(format!(
            "connect timed out after {:?}",
            options.timeout
        ))),
    }
}

async fn run_session(
    url: String,
    options: TransportOptions,
    shared: Arc<Shared>,
    callbacks: Callbacks,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = dial(&url, &options) => result,
        };

        match dialed {
            Ok(ws) => {
                attempt = 0;
                shared.open.store(true, Ordering::SeqCst);
                info!("websocket open: {url}");
                callbacks.connected();

                let end = pump(ws, &shared, &callbacks, &mut outgoing, &cancel).await;
                shared.open.store(false, Ordering::SeqCst);

                match end {
                    SessionEnd::ClientClose => {
                        callbacks.disconnected(CLIENT_CLOSE_REASON.to_string());
                        return;
                    }
                    SessionEnd::ServerClose(reason) => {
                        info!("websocket closed by server: {reason}");
                        callbacks.disconnected(reason);
                    }
                    SessionEnd::Failed(reason) => {
                        warn!("websocket session failed: {reason}");
                        callbacks.disconnected(reason);
                    }
                }
            }
            Err(fault) => {
                if cancel.is_cancelled() {
                    return;
                }
                warn!("websocket dial failed: {}", fault.describe());
                callbacks.error(fault);
            }
        }

        if !options.reconnection {
            return;
        }
        attempt += 1;
        if options.reconnection_attempts > 0 && attempt > options.reconnection_attempts {
            warn!(
                "max reconnection attempts ({}) reached",
                options.reconnection_attempts
            );
            return;
        }

        let delay = reconnect_delay(options.reconnection_delay, attempt - 1);
        debug!("redial attempt {attempt} in {:.1}s", delay.as_secs_f64());
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

async fn pump(
    ws: WsStream,
    shared: &Shared,
    callbacks: &Callbacks,
    outgoing: &mut mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush frames queued before close().
                while let Ok(message) = outgoing.try_recv() {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::ClientClose;
            }
            message = outgoing.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        return SessionEnd::Failed(e.to_string());
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::ClientClose;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str(), callbacks),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => shared.dispatch(text, callbacks),
                    Err(_) => debug!("ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "io server disconnect".to_string());
                    return SessionEnd::ServerClose(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                None => return SessionEnd::ServerClose("transport close".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("https://play.example.com").unwrap(), "wss://play.example.com");
        assert_eq!(websocket_url("http://localhost:3000").unwrap(), "ws://localhost:3000");
        assert_eq!(websocket_url("ws://x").unwrap(), "ws://x");
        assert!(websocket_url("ftp://x").is_err());
    }

    #[test]
    fn test_reconnect_delay_sequence() {
        let base = Duration::from_secs(1);
        let d0 = reconnect_delay(base, 0);
        let d1 = reconnect_delay(base, 1);
        let d4 = reconnect_delay(base, 4);
        let d10 = reconnect_delay(base, 10);

        // ~0.7-1.3s
        assert!(d0 >= Duration::from_millis(500));
        assert!(d0 <= Duration::from_millis(1300));
        assert!(d1 >= Duration::from_millis(1400));
        assert!(d4 > Duration::from_secs(11));
        // capped at 30s +/- jitter
        assert!(d10 <= Duration::from_secs(39));
    }

    #[test]
    fn test_envelope_shapes() {
        let emit = Envelope {
            event: Some("joinGame".into()),
            data: json!({"table": 4}),
            id: Some(2),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&emit).unwrap(),
            json!({"event": "joinGame", "data": {"table": 4}, "id": 2})
        );

        let ack: Envelope = serde_json::from_str(r#"{"ack": 2}"#).unwrap();
        assert_eq!(ack.ack, Some(2));
        assert_eq!(ack.data, Value::Null);
    }

    #[test]
    fn test_dispatch_routes_events_acks_and_errors() {
        let shared = Shared::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let faults = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        lock(&shared.handlers).insert(
            "gameStart".into(),
            Arc::new(move |data: Value| sink.lock().unwrap().push(data)),
        );
        let acked = Arc::new(Mutex::new(None));
        let ack_sink = acked.clone();
        lock(&shared.acks).insert(5, Box::new(move |data: Value| *ack_sink.lock().unwrap() = Some(data)));

        let fault_sink = faults.clone();
        let callbacks = Callbacks {
            error: Some(Arc::new(move |f: TransportFault| fault_sink.lock().unwrap().push(f))),
            ..Default::default()
        };

        shared.dispatch(r#"{"event": "gameStart", "data": {"round": 1}}"#, &callbacks);
        shared.dispatch(r#"{"ack": 5, "data": "ok"}"#, &callbacks);
        shared.dispatch(r#"{"ack": 5, "data": "again"}"#, &callbacks);
        shared.dispatch(r#"{"event": "error", "data": {"message": "kicked"}}"#, &callbacks);
        shared.dispatch("not json", &callbacks);

        assert_eq!(*received.lock().unwrap(), vec![json!({"round": 1})]);
        assert_eq!(*acked.lock().unwrap(), Some(json!("ok")));
        assert!(lock(&shared.acks).is_empty());
        assert_eq!(faults.lock().unwrap()[0].describe(), "kicked");
    }

    #[test]
    fn test_closed_transport_rejects_emit_and_tolerates_close() {
        let mut transport = WebSocketTransport::new();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.emit("x", Value::Null),
            Err(TetherError::TransportClosed)
        ));
        assert!(transport.emit_with_ack("x", Value::Null, Box::new(|_| {})).is_err());
        assert!(lock(&transport.shared.acks).is_empty());
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
        assert!(transport.off("missing").is_err());
    }
}
