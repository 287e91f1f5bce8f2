//! Log capture for assertions in tests.
//!
//! [`capture_logs`] installs a thread-local subscriber. Tasks spawned on a
//! current-thread tokio runtime run on the test thread, so what the
//! runtime's background loops log is captured too.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug)]
struct Record {
    level: Level,
    message: String,
    fields: Vec<(&'static str, String)>,
}

/// Events logged on this thread since [`capture_logs`] was called.
#[derive(Clone, Debug, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<Record>>>,
}

impl CapturedLogs {
    fn any(&self, pred: impl Fn(&Record) -> bool) -> bool {
        self.records.lock().iter().any(pred)
    }

    /// Whether any message contains `needle`.
    pub fn has_message(&self, needle: &str) -> bool {
        self.any(|r| r.message.contains(needle))
    }

    /// Whether any message at `level` contains `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.any(|r| r.level == level && r.message.contains(needle))
    }

    /// Whether any event carried `name = value`. Strings compare unquoted,
    /// other values by their display form.
    pub fn has_field(&self, name: &str, value: &str) -> bool {
        self.any(|r| r.fields.iter().any(|(k, v)| *k == name && v == value))
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl RecordVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name(), value));
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }
}

struct CaptureLayer(CapturedLogs);

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        self.0.records.lock().push(Record {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Capture every event logged on the current thread until the guard drops.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer(logs.clone()))
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}
