//! Application configuration management.
//!
//! Handles loading, saving, and accessing configuration for the socket
//! session, the stored session token, and logging. Configuration is
//! persisted as TOML on disk; every field has a default so a partial file
//! (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{TetherError, TetherResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Socket connection and recovery settings.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Stored session credentials.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport kind hint passed to the socket client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent WebSocket connection.
    #[default]
    Websocket,
    /// HTTP long-polling.
    Polling,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Websocket => write!(f, "websocket"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

/// Socket connection configuration.
///
/// Durations are stored in milliseconds so the TOML stays flat; use the
/// accessor methods to get [`Duration`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Server endpoint URL (e.g. "https://play.example.com").
    #[serde(default)]
    pub endpoint: String,

    /// Start connecting as soon as the manager is created.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Transport kind hint.
    #[serde(default)]
    pub transport: TransportKind,

    /// Let the transport reconnect on its own after a drop.
    #[serde(default = "default_true")]
    pub reconnection: bool,

    /// Maximum transport-level reconnection attempts (0 = unlimited).
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    /// Base delay between transport-level reconnection attempts.
    #[serde(default = "default_reconnection_delay")]
    pub reconnection_delay_ms: u64,

    /// Handshake timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Keep the session open while the host app is backgrounded.
    #[serde(default = "default_true")]
    pub keep_alive_in_background: bool,

    /// Suppress the disconnect panel/log for drops that happen while backgrounded.
    #[serde(default = "default_true")]
    pub suppress_ui_in_background: bool,

    /// Reconnect when the host app returns to the foreground.
    #[serde(default = "default_true")]
    pub auto_reconnect_on_resume: bool,

    /// Minimum time between two resume-triggered reconnects.
    #[serde(default = "default_auto_reconnect_cooldown")]
    pub auto_reconnect_cooldown_ms: u64,

    /// Reachability poll interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Continuous unreachability tolerated before disconnecting.
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_ms: u64,

    /// Capacity of the diagnostic event log.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,

    /// Nesting depth rendered for logged payloads.
    #[serde(default = "default_log_max_depth")]
    pub log_max_depth: usize,

    /// Collection items rendered for logged payloads.
    #[serde(default = "default_log_max_items")]
    pub log_max_items: usize,

    /// Events subscribed automatically after every successful connect.
    #[serde(default = "default_auto_listen_events")]
    pub auto_listen_events: Vec<String>,

    /// Event name (case-insensitive) that latches the game-start flag.
    #[serde(default = "default_game_start_event")]
    pub game_start_event: String,

    /// Show a panel when an established session drops.
    #[serde(default = "default_true")]
    pub show_disconnect_panel: bool,

    /// Show a panel when the transport reports an error.
    #[serde(default = "default_true")]
    pub show_error_panel: bool,

    /// Show a panel when reachability is lost for the grace period.
    #[serde(default = "default_true")]
    pub show_no_internet_panel: bool,

    /// Show a loader panel while a connect attempt is in flight.
    #[serde(default)]
    pub show_connecting_loader: bool,

    /// Hide the manager's own panel once a connect succeeds.
    #[serde(default = "default_true")]
    pub hide_panel_on_reconnect: bool,

    /// Panel text for a dropped session.
    #[serde(default = "default_disconnect_message")]
    pub disconnect_message: String,

    /// Label prefixed to transport error messages on the panel.
    #[serde(default = "default_error_label")]
    pub error_label: String,

    /// Panel text when the network is unreachable.
    #[serde(default = "default_no_internet_message")]
    pub no_internet_message: String,

    /// Loader label while connecting.
    #[serde(default = "default_connecting_label")]
    pub connecting_label: String,
}

/// Stored session credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Auth token attached to the socket handshake. Empty means anonymous.
    #[serde(default)]
    pub auth_token: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_reconnection_attempts() -> u32 {
    5
}

fn default_reconnection_delay() -> u64 {
    1_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_auto_reconnect_cooldown() -> u64 {
    3_000
}

fn default_poll_interval() -> u64 {
    constants::DEFAULT_POLL_INTERVAL_MS
}

fn default_disconnect_grace() -> u64 {
    constants::DEFAULT_DISCONNECT_GRACE_MS
}

fn default_max_log_entries() -> usize {
    constants::DEFAULT_MAX_LOG_ENTRIES
}

fn default_log_max_depth() -> usize {
    constants::DEFAULT_LOG_MAX_DEPTH
}

fn default_log_max_items() -> usize {
    constants::DEFAULT_LOG_MAX_ITEMS
}

fn default_auto_listen_events() -> Vec<String> {
    constants::DEFAULT_AUTO_LISTEN_EVENTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_game_start_event() -> String {
    constants::GAME_START_EVENT.to_string()
}

fn default_disconnect_message() -> String {
    "Connection lost. Trying to get you back in...".to_string()
}

fn default_error_label() -> String {
    "Connection error".to_string()
}

fn default_no_internet_message() -> String {
    "No internet connection.".to_string()
}

fn default_connecting_label() -> String {
    "Connecting...".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auto_start: true,
            transport: TransportKind::default(),
            reconnection: true,
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay(),
            connect_timeout_ms: default_connect_timeout(),
            keep_alive_in_background: true,
            suppress_ui_in_background: true,
            auto_reconnect_on_resume: true,
            auto_reconnect_cooldown_ms: default_auto_reconnect_cooldown(),
            poll_interval_ms: default_poll_interval(),
            disconnect_grace_ms: default_disconnect_grace(),
            max_log_entries: default_max_log_entries(),
            log_max_depth: default_log_max_depth(),
            log_max_items: default_log_max_items(),
            auto_listen_events: default_auto_listen_events(),
            game_start_event: default_game_start_event(),
            show_disconnect_panel: true,
            show_error_panel: true,
            show_no_internet_panel: true,
            show_connecting_loader: false,
            hide_panel_on_reconnect: true,
            disconnect_message: default_disconnect_message(),
            error_label: default_error_label(),
            no_internet_message: default_no_internet_message(),
            connecting_label: default_connecting_label(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl SocketConfig {
    /// Reachability poll interval. Never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Grace period before an unreachable network forces a disconnect.
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Cooldown between resume-triggered reconnects.
    pub fn auto_reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.auto_reconnect_cooldown_ms)
    }

    /// Base delay between transport-level reconnection attempts.
    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The endpoint after normalization; empty if unset.
    pub fn normalized_endpoint(&self) -> String {
        AppConfig::sanitize_endpoint(&self.endpoint)
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> TetherResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> TetherResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> TetherResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> TetherResult<PathBuf> {
        Platform::config_file()
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> TetherResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Platform::log_dir()
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether a socket endpoint is configured.
    pub fn is_endpoint_configured(&self) -> bool {
        !self.socket.normalized_endpoint().is_empty()
    }

    /// Sanitize and normalize an endpoint URL.
    ///
    /// Strips whitespace, surrounding quotes and trailing slashes. A bare
    /// host gets `http://` when it is local and `https://` otherwise.
    /// Explicit `ws`, `wss`, `http` and `https` schemes are kept.
    pub fn sanitize_endpoint(endpoint: &str) -> String {
        let trimmed = endpoint.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let has_scheme = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| trimmed.starts_with(scheme));

        let with_scheme = if has_scheme {
            trimmed.to_string()
        } else if is_local_host(trimmed) {
            format!("http://{trimmed}")
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

fn is_local_host(address: &str) -> bool {
    let host = address.split([':', '/']).next().unwrap_or_default();
    host == "localhost"
        || host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: None,
        }
    }

    /// Remember where this configuration was loaded from so `save` writes it back.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to its source path (or the default path).
    pub async fn save(&self) -> TetherResult<PathBuf> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => AppConfig::default_config_path()?,
        };
        let config = self.inner.read().await;
        config.save_to_file(&path)?;
        Ok(path)
    }
}
