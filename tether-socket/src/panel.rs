//! Connection overlay contract.
//!
//! The manager asks the host UI to show a loader or an error message and to
//! hide it again. It only ever hides a panel it opened itself.

use tracing::{info, warn};

/// A single overlay that can show a loader or an error.
pub trait Panel: Send + Sync {
    fn set_active(&self, active: bool);

    fn show_loader(&self, label: &str);

    /// Show an error message. A visible panel has its text replaced.
    fn show_error(&self, message: &str);

    fn hide(&self);

    fn is_active(&self) -> bool;
}

/// Panel for hosts without a UI. Forwards requests to the log and is never active.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPanel;

impl Panel for LogPanel {
    fn set_active(&self, _active: bool) {}

    fn show_loader(&self, label: &str) {
        info!("panel loader: {label}");
    }

    fn show_error(&self, message: &str) {
        warn!("panel error: {message}");
    }

    fn hide(&self) {}

    fn is_active(&self) -> bool {
        false
    }
}
