//! Line-oriented log sinks.
//!
//! The host owns one [`LogRelay`]. Everything that produces log lines writes into it and
//! the application chains a concrete sink (the rotating file sink) behind it while open.

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stream a line belongs to; file sinks filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    System,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Access,
}

impl LogKind {
    pub const ALL: [LogKind; 7] = [
        LogKind::System,
        LogKind::Fatal,
        LogKind::Error,
        LogKind::Warn,
        LogKind::Info,
        LogKind::Debug,
        LogKind::Access,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::System => "system",
            LogKind::Fatal => "fatal",
            LogKind::Error => "error",
            LogKind::Warn => "warn",
            LogKind::Info => "info",
            LogKind::Debug => "debug",
            LogKind::Access => "access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, line)` consumer. Implementations must not log through `tracing` themselves.
pub trait LogSink: Send + Sync {
    fn write(&self, kind: LogKind, line: &str);

    fn flush(&self) {}

    /// Stamp `message` and write it.
    fn log(&self, kind: LogKind, message: &str) {
        self.write(kind, &format_line(kind, message));
    }
}

/// `2024-05-01 12:00:00.123 access  GET /news 200 3ms`
pub fn format_line(kind: LogKind, message: &str) -> String {
    format!(
        "{} {:<7} {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        kind.as_str(),
        message
    )
}

struct Chained(Arc<dyn LogSink>);

/// Swappable chain point. Writes are dropped while nothing is chained.
#[derive(Default)]
pub struct LogRelay {
    next: ArcSwapOption<Chained>,
}

impl LogRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain `next` behind the relay, or unchain with `None`.
    pub fn set_next(&self, next: Option<Arc<dyn LogSink>>) {
        self.next.store(next.map(|s| Arc::new(Chained(s))));
    }

    pub fn is_chained(&self) -> bool {
        self.next.load().is_some()
    }
}

impl LogSink for LogRelay {
    fn write(&self, kind: LogKind, line: &str) {
        if let Some(next) = self.next.load().as_ref() {
            next.0.write(kind, line);
        }
    }

    fn flush(&self) {
        if let Some(next) = self.next.load().as_ref() {
            next.0.flush();
        }
    }
}
