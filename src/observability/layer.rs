//! Tracing layer that copies request-scoped events into the request state
//!
//! Requests register their state under their capture key while they run. Any
//! event emitted inside a span carrying a `capture_key` field (or carrying the
//! field itself) is appended to that request's log entries. The correlation id
//! is never used for routing since clients may send the same one on
//! concurrent requests.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use crate::context::{CaptureKey, RequestState};
use crate::models::{LogEntry, LogLevel};

/// Live requests whose log events should be captured
#[derive(Clone, Default)]
pub struct LogCaptureRegistry {
    enabled: bool,
    requests: Arc<DashMap<CaptureKey, Weak<RequestState>>>,
}

impl LogCaptureRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            requests: Arc::new(DashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Track `state` until the returned guard is dropped
    pub fn register(&self, state: &Arc<RequestState>) -> LogCaptureGuard {
        let key = self.enabled.then(|| {
            let key = state.capture_key();
            self.requests.insert(key, Arc::downgrade(state));
            key
        });
        LogCaptureGuard {
            requests: self.requests.clone(),
            key,
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn lookup(&self, key: CaptureKey) -> Option<Arc<RequestState>> {
        self.requests.get(&key).and_then(|entry| entry.upgrade())
    }
}

pub struct LogCaptureGuard {
    requests: Arc<DashMap<CaptureKey, Weak<RequestState>>>,
    key: Option<CaptureKey>,
}

impl Drop for LogCaptureGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.requests.remove(&key);
        }
    }
}

/// Capture key recorded on a span when it is created
struct SpanCaptureKey(CaptureKey);

pub struct LogCaptureLayer {
    registry: LogCaptureRegistry,
}

impl LogCaptureLayer {
    pub fn new(registry: LogCaptureRegistry) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !self.registry.is_enabled() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if let (Some(key), Some(span)) = (visitor.capture_key, ctx.span(id)) {
            span.extensions_mut().insert(SpanCaptureKey(key));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if !self.registry.is_enabled() || self.registry.is_empty() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let key = visitor.capture_key.take().or_else(|| {
            ctx.event_scope(event)?
                .find_map(|span| span.extensions().get::<SpanCaptureKey>().map(|key| key.0))
        });
        let Some(state) = key.and_then(|key| self.registry.lookup(key)) else {
            return;
        };

        let metadata = event.metadata();
        state.add_log_entry(LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::from_tracing(metadata.level()),
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    capture_key: Option<CaptureKey>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldVisitor {
    fn record_value(&mut self, name: &str, value: serde_json::Value) {
        match name {
            "message" => {
                self.message = Some(match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            "capture_key" => {
                self.capture_key = match value {
                    serde_json::Value::String(s) => s.parse().ok(),
                    other => other.as_u64(),
                }
                .map(CaptureKey::from_raw);
            }
            _ => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        self.record_value(
            field.name(),
            serde_json::Value::String(rendered.trim_matches('"').to_string()),
        );
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record_value(field.name(), serde_json::Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.record_value(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.record_value(field.name(), value.into());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.record_value(field.name(), value.into());
    }
}
