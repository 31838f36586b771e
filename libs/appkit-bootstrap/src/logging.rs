use crate::config::LoggingConfig;
use crate::sink::{format_line, LogKind, LogRelay, LogSink};
use std::fmt::Write as _;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

// Keep a guard for non-blocking console to avoid being dropped.
static CONSOLE_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

/// Field that lets an event pick its stream explicitly, e.g. `log_kind = "system"`.
pub const LOG_KIND_FIELD: &str = "log_kind";

// ================= level helpers =================

fn parse_tracing_level(s: &str) -> Option<tracing::Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

fn level_filter(s: &str) -> LevelFilter {
    parse_tracing_level(s)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::OFF)
}

fn kind_for_level(level: &Level) -> LogKind {
    match *level {
        Level::ERROR => LogKind::Error,
        Level::WARN => LogKind::Warn,
        Level::INFO => LogKind::Info,
        _ => LogKind::Debug,
    }
}

/// Console targets: default level plus per-target overrides.
pub fn build_targets(cfg: &LoggingConfig) -> Targets {
    cfg.targets.iter().fold(
        Targets::new().with_default(level_filter(&cfg.console_level)),
        |targets, (target, level)| targets.with_target(target.clone(), level_filter(level)),
    )
}

// ================= relay layer =================

/// Renders every event as one line and writes it into the [`LogRelay`].
pub struct RelayLayer {
    relay: Arc<LogRelay>,
}

impl RelayLayer {
    pub fn new(relay: Arc<LogRelay>) -> Self {
        Self { relay }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
    kind: Option<LogKind>,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            LOG_KIND_FIELD => self.kind = LogKind::parse(value),
            "message" => self.message.push_str(value),
            name => {
                let _ = write!(self.fields, " {name}={value}");
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => {
                let _ = write!(self.message, "{value:?}");
            }
            LOG_KIND_FIELD => self.kind = LogKind::parse(&format!("{value:?}")),
            name => {
                let _ = write!(self.fields, " {name}={value:?}");
            }
        }
    }
}

impl<S: Subscriber> Layer<S> for RelayLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.relay.is_chained() {
            return;
        }
        let meta = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let kind = visitor
            .kind
            .unwrap_or_else(|| kind_for_level(meta.level()));
        let message = format!("[{}] {}{}", meta.target(), visitor.message, visitor.fields);
        self.relay.write(kind, &format_line(kind, &message));
    }
}

// ================= public init =================

/// Install the process subscriber: console output filtered by `cfg`, `RUST_LOG` as an
/// upper bound when set, and the relay layer feeding the application's log file.
pub fn init_logging(cfg: &LoggingConfig, relay: Arc<LogRelay>) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // Bridge `log` → `tracing` *before* installing the subscriber
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_filter(build_targets(cfg));

    let relay_layer = RelayLayer::new(relay).with_filter(
        Targets::new().with_default(level_filter(&cfg.console_level).max(LevelFilter::INFO)),
    );

    let result = tracing_subscriber::registry()
        .with(env)
        .with(console_layer)
        .with(relay_layer)
        .try_init();

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::MemorySink;
    use std::collections::BTreeMap;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn level_names_are_lenient() {
        assert_eq!(parse_tracing_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_tracing_level("bogus"), Some(Level::INFO));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(level_filter("none"), LevelFilter::OFF);
    }

    #[test]
    fn targets_honor_per_target_levels() {
        let cfg = LoggingConfig {
            console_level: "warn".into(),
            targets: BTreeMap::from([("sqlx".to_string(), "error".to_string())]),
        };
        let targets = build_targets(&cfg);

        assert!(targets.would_enable("appkit", &Level::WARN));
        assert!(!targets.would_enable("appkit", &Level::INFO));
        assert!(!targets.would_enable("sqlx::query", &Level::WARN));
    }

    #[test]
    fn relay_layer_renders_events_into_chained_sink() {
        let relay = Arc::new(LogRelay::new());
        let memory = Arc::new(MemorySink::default());
        relay.set_next(Some(memory.clone()));

        let subscriber = tracing_subscriber::registry().with(RelayLayer::new(relay));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "demo", port = 80, "listener degraded");
            tracing::info!(target: "demo", log_kind = "system", "opening");
        });

        let lines = memory.lines.lock();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, LogKind::Warn);
        assert!(lines[0].1.ends_with("[demo] listener degraded port=80"), "{}", lines[0].1);
        assert_eq!(lines[1].0, LogKind::System);
    }
}
