use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Shared ring of formatted log lines read by the log pane.
pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

pub fn new_log_buffer() -> LogBuffer {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Tracing layer that keeps the most recent `capacity` events, one line each:
/// `[LEVEL] target: message key=value ...`.
pub struct TuiLogLayer {
    buffer: LogBuffer,
    capacity: usize,
}

impl TuiLogLayer {
    pub fn new(buffer: LogBuffer, capacity: usize) -> Self {
        Self {
            buffer,
            capacity: capacity.max(1),
        }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        let _ = write!(self.fields, " {name}={value}");
    }
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for TuiLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "[{}] {}: {}{}",
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        );

        if let Ok(mut buf) = self.buffer.lock() {
            while buf.len() >= self.capacity {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn make_layer_and_buffer(capacity: usize) -> (LogBuffer, impl tracing::Subscriber) {
        let buffer = new_log_buffer();
        let layer = TuiLogLayer::new(Arc::clone(&buffer), capacity);
        (buffer, Registry::default().with(layer))
    }

    #[test]
    fn test_log_layer_bounded_drops_oldest() {
        let (buffer, subscriber) = make_layer_and_buffer(2);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("first");
            tracing::info!("second");
            tracing::info!("third");
        });
        let buf = buffer.lock().unwrap();
        assert_eq!(buf.len(), 2);
        assert!(buf[0].contains("second"), "expected 'second', got: {}", buf[0]);
        assert!(buf[1].contains("third"), "expected 'third', got: {}", buf[1]);
    }

    #[test]
    fn test_log_layer_format() {
        let (buffer, subscriber) = make_layer_and_buffer(100);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "voxlive", "session failed");
        });
        let buf = buffer.lock().unwrap();
        assert_eq!(buf[0], "[WARN] voxlive: session failed");
    }

    #[test]
    fn test_log_layer_appends_structured_fields() {
        let (buffer, subscriber) = make_layer_and_buffer(100);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "voxlive", cancelled = 3, state = "closed", "playback interrupted");
        });
        let buf = buffer.lock().unwrap();
        assert_eq!(
            buf[0],
            "[INFO] voxlive: playback interrupted cancelled=3 state=closed"
        );
    }

    #[test]
    fn test_log_layer_zero_capacity_keeps_latest() {
        let (buffer, subscriber) = make_layer_and_buffer(0);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("a");
            tracing::info!("b");
        });
        let buf = buffer.lock().unwrap();
        assert_eq!(buf.len(), 1);
        assert!(buf[0].ends_with("b"));
    }
}
