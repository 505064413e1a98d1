// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bridge from `tracing` events to the [`LogHub`].

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::entry::LogLevel;
use super::hub::LogHub;

/// Targets under this prefix are the monitor's own diagnostics.
const SELF_TARGET: &str = "streamlib_monitor";

/// `tracing_subscriber` layer forwarding host log events to observer clients.
///
/// ```ignore
/// tracing_subscriber::registry()
///     .with(tracing_subscriber::fmt::layer())
///     .with(monitor.capture_layer())
///     .init();
/// ```
pub struct LogCaptureLayer {
    hub: Arc<LogHub>,
}

impl LogCaptureLayer {
    pub fn new(hub: Arc<LogHub>) -> Self {
        Self { hub }
    }
}

impl<S: Subscriber> Layer<S> for LogCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(SELF_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let origin = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(file), None) => Some(file.to_string()),
            _ => None,
        };

        self.hub.emit(
            metadata.target(),
            map_level(*metadata.level()),
            visitor.finish(),
            origin.as_deref(),
        );
    }
}

fn map_level(level: Level) -> LogLevel {
    match level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warning,
        Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_layer_forwards_host_events() {
        let hub = Arc::new(LogHub::new(256));
        let queue = hub.register();
        queue.set_level(LogLevel::Debug);
        queue.set_capturing(true);

        let subscriber =
            tracing_subscriber::registry().with(LogCaptureLayer::new(Arc::clone(&hub)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "camera", frames = 3, "dropped frames");
            tracing::trace!(target: "encoder", "tick");
            tracing::error!(target: "streamlib_monitor::client", "ignored");
        });

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].tool, "camera");
        assert_eq!(drained[0].level, LogLevel::Warning);
        assert_eq!(drained[0].message, "dropped frames frames=3");
        assert!(drained[0].origin.as_deref().is_some_and(|o| o.contains("layer.rs")));
        assert_eq!(drained[1].level, LogLevel::Debug);
    }
}
