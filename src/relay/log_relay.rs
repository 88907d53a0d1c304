//! Log relay.
//!
//! [`LogRelayLayer`] is a `tracing_subscriber::Layer` that captures tracing
//! events as [`LogRecord`]s and pushes them into the dispatcher input channel.
//! [`LogRelayFilter`] decides which records are admitted: anything below the
//! severity threshold, from an excluded source, or from a reserved source is
//! dropped.

use std::str::FromStr;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::Context, Layer};

use crate::common::messages::{LogRecord, RelayInput};
use crate::config::types::LogRelayConfig;

/// Target used by the relay's own per-message logging. Never relayed.
pub const TRANSPORT_TARGET: &str = "relaybot::transport";

/// Sources rejected whatever the configuration says. The Discord library logs
/// its own send failures, and relaying those would feed back into the sends.
const RESERVED_SOURCES: [&str; 2] = [TRANSPORT_TARGET, "serenity"];

/// Severity and source rules for log records.
#[derive(Debug, Clone)]
pub struct LogRelayFilter {
    threshold: LevelFilter,
    excluded_sources: Vec<String>,
}

impl LogRelayFilter {
    pub fn new(threshold: LevelFilter, excluded_sources: Vec<String>) -> Self {
        Self {
            threshold,
            excluded_sources,
        }
    }

    /// A filter that admits nothing.
    pub fn disabled() -> Self {
        Self::new(LevelFilter::OFF, Vec::new())
    }

    /// Build the filter from configuration. A disabled log relay admits nothing.
    pub fn from_config(config: &LogRelayConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let threshold = LevelFilter::from_str(&config.min_level).unwrap_or(LevelFilter::WARN);
        Self::new(threshold, config.excluded_sources.clone())
    }

    /// Whether a record may be relayed.
    pub fn admit(&self, record: &LogRecord) -> bool {
        if RESERVED_SOURCES
            .iter()
            .any(|reserved| is_source(&record.source, reserved))
        {
            return false;
        }
        if self
            .excluded_sources
            .iter()
            .any(|excluded| is_source(&record.source, excluded))
        {
            return false;
        }
        // Level ordering: ERROR is the lowest, so "at least as severe" is `<=`
        record.level <= self.threshold
    }
}

/// Whether `source` is `name` or one of its submodules.
fn is_source(source: &str, name: &str) -> bool {
    source == name
        || source
            .strip_prefix(name)
            .map(|rest| rest.starts_with("::"))
            .unwrap_or(false)
}

// ── Visitor (extracts the message from tracing events) ─────────────────────

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.into();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

// ── LogRelayLayer ──────────────────────────────────────────────────────────

/// Forwards every tracing event to the dispatcher as a log record.
pub struct LogRelayLayer {
    input_tx: mpsc::UnboundedSender<RelayInput>,
}

impl LogRelayLayer {
    pub fn new(input_tx: mpsc::UnboundedSender<RelayInput>) -> Self {
        Self { input_tx }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogRelayLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(TRANSPORT_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord::new(*meta.level(), meta.target(), visitor.finish());
        // Receiver gone means the dispatcher has shut down
        let _ = self.input_tx.send(RelayInput::Log(record));
    }
}
