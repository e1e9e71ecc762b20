//! Forwarding of client diagnostics to the server.
//!
//! [`RemoteLogLayer`] is a `tracing_subscriber` layer that turns events at or
//! above a severity into [`LogRecord`]s on a channel. The runner drains the
//! channel and sends each record as a `log` message. Events from this crate
//! are not forwarded: they describe the connection the records would travel
//! over.

use std::fmt;

use lockstep_core::schema::LogSeverity;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

const LOCAL_TARGET: &str = "lockstep_client";

/// A diagnostic ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Wire severity.
    pub severity: LogSeverity,
    /// Rendered message with its fields.
    pub log: String,
}

/// Layer that forwards events to a channel.
#[derive(Debug, Clone)]
pub struct RemoteLogLayer {
    records: UnboundedSender<LogRecord>,
    max_level: Level,
}

/// Create a layer forwarding events up to `max_level` verbosity, and the
/// receiver to hand to the runner.
#[must_use]
pub fn remote_log_layer(max_level: Level) -> (RemoteLogLayer, UnboundedReceiver<LogRecord>) {
    let (records, rx) = mpsc::unbounded_channel();
    (RemoteLogLayer { records, max_level }, rx)
}

fn severity(level: Level) -> LogSeverity {
    if level == Level::ERROR {
        LogSeverity::Error
    } else if level == Level::WARN {
        LogSeverity::Warn
    } else {
        LogSeverity::Info
    }
}

impl<S: Subscriber> Layer<S> for RemoteLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level || metadata.target().starts_with(LOCAL_TARGET) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        // Receiver gone means the runner stopped; nothing left to send to.
        let _ = self.records.send(LogRecord {
            severity: severity(*metadata.level()),
            log: visitor.render(metadata.target()),
        });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<String>,
}

impl RecordVisitor {
    fn render(self, target: &str) -> String {
        let mut out = format!("{target}: {}", self.message);
        for field in self.fields {
            out.push(' ');
            out.push_str(&field);
        }
        out
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}
