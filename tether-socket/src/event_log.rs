//! Diagnostic event log.
//!
//! Every payload that crosses the socket is rendered into a short,
//! bounded string and kept in a fixed-size ring buffer so that the most
//! recent traffic can be inspected when something goes wrong. Rendering is
//! for humans only and is never used on the wire.

use std::collections::VecDeque;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use tether_core::constants;

/// Rendered in place of a value nested deeper than the depth limit.
pub const DEPTH_SENTINEL: &str = "<max depth>";

/// A payload shape the diagnostic renderer understands.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Null,
    Bool(bool),
    /// Integers keep full precision, including `u64` values past `i64::MAX`.
    Integer(i128),
    Number(f64),
    Text(String),
    List(Vec<LogValue>),
    /// Ordered entries; keys may be any value, string keys render quoted.
    Map(Vec<(LogValue, LogValue)>),
    /// Anything else, already reduced to a description.
    Opaque(String),
}

impl From<&serde_json::Value> for LogValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => LogValue::Null,
            Value::Bool(b) => LogValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    LogValue::Integer(i.into())
                } else if let Some(u) = n.as_u64() {
                    LogValue::Integer(u.into())
                } else if let Some(f) = n.as_f64() {
                    LogValue::Number(f)
                } else {
                    LogValue::Opaque(n.to_string())
                }
            }
            Value::String(s) => LogValue::Text(s.clone()),
            Value::Array(items) => LogValue::List(items.iter().map(LogValue::from).collect()),
            Value::Object(map) => LogValue::Map(
                map.iter()
                    .map(|(k, v)| (LogValue::Text(k.clone()), LogValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for LogValue {
    fn from(value: serde_json::Value) -> Self {
        LogValue::from(&value)
    }
}

impl From<&str> for LogValue {
    fn from(s: &str) -> Self {
        LogValue::Text(s.to_string())
    }
}

impl From<String> for LogValue {
    fn from(s: String) -> Self {
        LogValue::Text(s)
    }
}

impl From<bool> for LogValue {
    fn from(b: bool) -> Self {
        LogValue::Bool(b)
    }
}

impl From<f64> for LogValue {
    fn from(n: f64) -> Self {
        LogValue::Number(n)
    }
}

impl From<i64> for LogValue {
    fn from(n: i64) -> Self {
        LogValue::Integer(n.into())
    }
}

impl From<u64> for LogValue {
    fn from(n: u64) -> Self {
        LogValue::Integer(n.into())
    }
}

impl<T: Into<LogValue>> From<Option<T>> for LogValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(LogValue::Null)
    }
}

/// Depth- and size-bounded renderer for [`LogValue`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSerializer {
    /// Values nested deeper than this render as [`DEPTH_SENTINEL`].
    pub max_depth: usize,
    /// Lists and maps render at most this many entries.
    pub max_items: usize,
}

impl Default for LogSerializer {
    fn default() -> Self {
        Self {
            max_depth: constants::DEFAULT_LOG_MAX_DEPTH,
            max_items: constants::DEFAULT_LOG_MAX_ITEMS,
        }
    }
}

impl LogSerializer {
    pub fn new(max_depth: usize, max_items: usize) -> Self {
        Self { max_depth, max_items }
    }

    /// Render a value. Output is deterministic for a given input.
    pub fn render(&self, value: &LogValue) -> String {
        let mut out = String::new();
        self.write_value(value, 0, &mut out);
        out
    }

    fn write_value(&self, value: &LogValue, depth: usize, out: &mut String) {
        if depth > self.max_depth {
            out.push_str(DEPTH_SENTINEL);
            return;
        }

        match value {
            LogValue::Null => out.push_str("null"),
            LogValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            LogValue::Integer(n) => {
                let _ = write!(out, "{n}");
            }
            LogValue::Number(n) => {
                let _ = write!(out, "{n}");
            }
            LogValue::Text(s) => {
                out.push('"');
                escape_into(s, out);
                out.push('"');
            }
            LogValue::Opaque(s) => {
                out.push('<');
                escape_into(s, out);
                out.push('>');
            }
            LogValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().take(self.max_items).enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(item, depth + 1, out);
                }
                self.write_truncation(items.len(), out);
                out.push(']');
            }
            LogValue::Map(entries) => {
                out.push('{');
                for (i, (key, val)) in entries.iter().take(self.max_items).enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(key, depth + 1, out);
                    out.push_str(": ");
                    self.write_value(val, depth + 1, out);
                }
                self.write_truncation(entries.len(), out);
                out.push('}');
            }
        }
    }

    fn write_truncation(&self, len: usize, out: &mut String) {
        if len > self.max_items {
            if self.max_items > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "<+{} more>", len - self.max_items);
        }
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

/// Which way a logged event travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Send,
    Recv,
    Ack,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "SEND"),
            Self::Recv => write!(f, "RECV"),
            Self::Ack => write!(f, "ACK"),
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub event: String,
    /// Payload rendered by [`LogSerializer`].
    pub payload: String,
}

/// Fixed-capacity ring buffer of [`EventLogEntry`]s, oldest first.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
    serializer: LogSerializer,
}

impl EventLog {
    pub fn new(capacity: usize, serializer: LogSerializer) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            serializer,
        }
    }

    /// Render and store an event, evicting the oldest entries beyond capacity.
    pub fn record(&mut self, direction: Direction, event: &str, payload: &LogValue) {
        let rendered = self.serializer.render(payload);
        debug!("[{direction}] {event} {rendered}");

        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(EventLogEntry {
            timestamp: Utc::now(),
            direction,
            event: event.to_string(),
            payload: rendered,
        });
    }

    /// Snapshot of the stored entries, oldest first.
    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
