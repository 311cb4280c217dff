//! Tether Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other Tether crates:
//! - Application configuration (socket endpoint, session token, logging)
//! - Global error type covering all error categories
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle, SocketConfig};
pub use error::{TetherError, TetherResult};
pub use logging::init_logging;
pub use platform::Platform;
