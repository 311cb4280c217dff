//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Tether";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Prefix of the daily rolling log files.
pub const LOG_FILE_PREFIX: &str = "tether.log";

/// Crates whose records follow the configured log level. Everything else
/// is held at `warn`.
pub const LOG_TARGETS: &[&str] = &["tether_core", "tether_socket", "tether_cli"];

/// Default number of entries kept in the diagnostic event log.
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 30;

/// Default nesting depth rendered by the diagnostic serializer.
pub const DEFAULT_LOG_MAX_DEPTH: usize = 6;

/// Default number of collection items rendered by the diagnostic serializer.
pub const DEFAULT_LOG_MAX_ITEMS: usize = 50;

/// Reachability poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Continuous unreachability tolerated before disconnecting, in milliseconds.
pub const DEFAULT_DISCONNECT_GRACE_MS: u64 = 2_000;

/// Event name that marks the start of a game session.
pub const GAME_START_EVENT: &str = "gameStart";

/// Events subscribed automatically after every successful connect.
pub const DEFAULT_AUTO_LISTEN_EVENTS: &[&str] = &["gameStart", "playerJoined", "gameEnded"];

/// Characters of an auth token shown at the start of a log preview.
pub const TOKEN_PREVIEW_HEAD: usize = 10;

/// Characters of an auth token shown at the end of a log preview.
pub const TOKEN_PREVIEW_TAIL: usize = 6;

/// Header used to carry the session token on the handshake request.
pub const AUTH_HEADER: &str = "Authorization";
