//! Global error types for Tether.
//!
//! All error categories across the workspace are unified into a single
//! `TetherError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using TetherError.
pub type TetherResult<T> = Result<T, TetherError>;

/// Unified error type covering all error categories in Tether.
#[derive(Error, Debug)]
pub enum TetherError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Transport errors --
    /// The underlying socket transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation needed an open transport but it was closed.
    #[error("transport closed")]
    TransportClosed,

    /// No handler was registered for the named event.
    #[error("no listener registered for event: {0}")]
    ListenerNotFound(String),

    /// An operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for TetherError {
    fn from(e: serde_json::Error) -> Self {
        TetherError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(e: toml::de::Error) -> Self {
        TetherError::Config(e.to_string())
    }
}
