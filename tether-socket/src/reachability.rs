//! Network reachability sampling and the monitor loops built on it.
//!
//! A [`ReachabilitySource`] answers "is there any network path right now".
//! Monitors are cancellable timer tasks that sample a source every tick
//! and hand the sample to a callback; the connection manager owns the
//! policy (see [`GraceTracker`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Coarse host reachability signal.
pub trait ReachabilitySource: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// A reachability flag set by hand. Clones share the flag.
#[derive(Debug, Clone)]
pub struct StaticReachability {
    reachable: Arc<AtomicBool>,
}

impl StaticReachability {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl ReachabilitySource for StaticReachability {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Reachability derived from periodically opening a TCP connection to the
/// server's host and port.
///
/// Optimistically reports reachable until the first probe completes.
pub struct TcpProbe {
    reachable: Arc<AtomicBool>,
    cancel: CancellationToken,
    target: String,
}

impl TcpProbe {
    /// Start probing `endpoint` every `interval`. Must be called inside a tokio runtime.
    ///
    /// Returns `None` if no host can be derived from the endpoint.
    pub fn spawn(endpoint: &str, interval: Duration, probe_timeout: Duration) -> Option<Self> {
        let target = probe_target(endpoint)?;
        let reachable = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let flag = reachable.clone();
        let token = cancel.clone();
        let addr = target.clone();
        tokio::spawn(async move {
            loop {
                let ok = matches!(
                    timeout(probe_timeout, TcpStream::connect(addr.as_str())).await,
                    Ok(Ok(_))
                );
                let was = flag.swap(ok, Ordering::SeqCst);
                if was != ok {
                    info!("reachability of {addr} changed: {was} -> {ok}");
                }

                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("tcp probe for {addr} stopped");
                        break;
                    }
                    _ = sleep(interval) => {}
                }
            }
        });

        Some(Self {
            reachable,
            cancel,
            target,
        })
    }

    /// The `host:port` being probed.
    pub fn target(&self) -> &str {
        &self.target
    }

}

impl Drop for TcpProbe {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ReachabilitySource for TcpProbe {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Derive `host:port` from an endpoint URL, defaulting the port from the scheme.
pub fn probe_target(endpoint: &str) -> Option<String> {
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("https", endpoint),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }

    let has_port = authority
        .rsplit_once(':')
        .map(|(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);
    if has_port {
        return Some(authority.to_string());
    }

    let port = match scheme {
        "http" | "ws" => 80,
        _ => 443,
    };
    Some(format!("{authority}:{port}"))
}

/// Result of feeding one sample to a [`GraceTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Network reachable. `restored` is true on an unreachable -> reachable edge.
    Reachable { restored: bool },
    /// Network unreachable. `grace_elapsed` once the accumulated outage reaches the grace period.
    Unreachable { grace_elapsed: bool },
}

/// Accumulates continuous unreachability across ticks.
#[derive(Debug, Clone)]
pub struct GraceTracker {
    grace: Duration,
    accumulated: Duration,
    last_reachable: Option<bool>,
}

impl GraceTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            accumulated: Duration::ZERO,
            last_reachable: None,
        }
    }

    /// Record a sample taken `tick` after the previous one.
    pub fn observe(&mut self, reachable: bool, tick: Duration) -> Observation {
        let previous = self.last_reachable.replace(reachable);
        if reachable {
            self.accumulated = Duration::ZERO;
            Observation::Reachable {
                restored: previous == Some(false),
            }
        } else {
            self.accumulated = self.accumulated.saturating_add(tick);
            Observation::Unreachable {
                grace_elapsed: self.accumulated >= self.grace,
            }
        }
    }

    /// Clear the accumulated outage, keeping the last sample so a later
    /// reachable sample still reports the restore edge.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }
}

/// Which monitor loop produced a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    /// Runs while the manager is not suspended.
    Active,
    /// Runs while suspended, waiting for the network to come back.
    SuspendedReturn,
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::SuspendedReturn => write!(f, "suspended-return"),
        }
    }
}

/// One reachability sample from a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTick {
    pub kind: MonitorKind,
    /// Identifies the monitor instance; ticks from stopped instances are stale.
    pub epoch: u64,
    pub reachable: bool,
}

/// A running monitor loop. Stopped on [`MonitorHandle::stop`] or drop.
pub struct MonitorHandle {
    epoch: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a monitor that samples `source` every `interval` and passes each
/// sample to `on_tick`. The loop ends when cancelled or when `on_tick`
/// returns false.
pub fn spawn_monitor<F>(
    kind: MonitorKind,
    epoch: u64,
    interval: Duration,
    source: Arc<dyn ReachabilitySource>,
    on_tick: F,
) -> MonitorHandle
where
    F: Fn(MonitorTick) -> bool + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        debug!("{kind} monitor #{epoch} started (interval {interval:?})");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(interval) => {}
            }
            if token.is_cancelled() {
                break;
            }
            let tick = MonitorTick {
                kind,
                epoch,
                reachable: source.is_reachable(),
            };
            if !on_tick(tick) {
                break;
            }
        }
        debug!("{kind} monitor #{epoch} stopped");
    });

    MonitorHandle {
        epoch,
        cancel,
        task,
    }
}
