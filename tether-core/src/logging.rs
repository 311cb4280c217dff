//! Structured logging setup using the `tracing` ecosystem.
//!
//! Tether's own crates log at the configured level while dependencies
//! (tungstenite, tokio) are held at `warn`. `--verbose` lowers Tether's
//! crates to `debug`, which is where the socket event log is written, so a
//! verbose session leaves a full SEND/RECV/ACK trace in the log file.
//! `RUST_LOG`, when set, replaces all of this.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::rolling;

use crate::config::LoggingConfig;
use crate::constants::{LOG_FILE_PREFIX, LOG_TARGETS};
use crate::error::TetherResult;

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Filter directives for the given configured level.
///
/// Unknown levels fall back to `info`. `verbose` never raises the level
/// above what was configured, so `trace` stays `trace`.
pub fn filter_directives(level: &str, verbose: bool) -> String {
    let level = level.trim().to_ascii_lowercase();
    let mut level = if LEVELS.contains(&level.as_str()) {
        level
    } else {
        "info".to_string()
    };
    if verbose && level != "trace" {
        level = "debug".to_string();
    }

    let mut directives = String::from("warn");
    for target in LOG_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level, verbose)))
}

/// Initialize the global subscriber: compact lines on stderr plus a daily
/// rolling file in `log_dir`, plain or JSON per `settings.json_output`.
pub fn init_logging(settings: &LoggingConfig, log_dir: &Path, verbose: bool) -> TetherResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .without_time()
        .compact();

    let registry = tracing_subscriber::registry()
        .with(build_filter(&settings.level, verbose))
        .with(console_layer);

    if settings.json_output {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .init();
    }

    tracing::debug!(
        "logging to {} ({})",
        log_dir.join(LOG_FILE_PREFIX).display(),
        filter_directives(&settings.level, verbose)
    );

    Ok(LogGuard { _guard: guard })
}

/// Keeps the non-blocking file writer alive. Dropping it flushes the file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Console-only logging, used when no log directory is available.
pub fn init_console_logging(level: &str, verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level, verbose))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .without_time()
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_follow_configured_level() {
        assert_eq!(
            filter_directives("info", false),
            "warn,tether_core=info,tether_socket=info,tether_cli=info"
        );
        assert_eq!(
            filter_directives(" WARN ", false),
            "warn,tether_core=warn,tether_socket=warn,tether_cli=warn"
        );
    }

    #[test]
    fn test_verbose_reaches_event_log() {
        assert!(filter_directives("info", true).contains("tether_socket=debug"));
        assert!(filter_directives("trace", true).contains("tether_socket=trace"));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert!(filter_directives("loud", false).contains("tether_cli=info"));
    }

    #[test]
    fn test_console_logging_does_not_panic() {
        // Subsequent calls are no-ops.
        init_console_logging("debug", false);
        init_console_logging("not a level", true);
    }
}
