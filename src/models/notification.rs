use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Severity attached to notifications, log entries and collector issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Information,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// Domain notification raised by application code during a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: LogLevel,
    pub key: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: LogLevel, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            level,
            key: key.into(),
            value: value.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Error captured while handling a request
///
/// Nested `source()` errors become `inner` exceptions, outermost first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<ExceptionInfo>>,
    /// Overrides the default `Error` severity used for attention levels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
            inner: None,
            level: None,
        }
    }

    /// Build from a typed error, walking its source chain
    pub fn from_error<E>(error: &E) -> Self
    where
        E: Error + 'static,
    {
        let mut info = Self::new(short_type_name::<E>(), error.to_string());
        info.inner = error.source().map(|source| Box::new(Self::from_source(source)));

        let backtrace = std::backtrace::Backtrace::capture();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            info.stack_trace = Some(backtrace.to_string());
        }
        info
    }

    fn from_source(error: &(dyn Error + 'static)) -> Self {
        let mut info = Self::new(debug_type_name(error), error.to_string());
        info.inner = error.source().map(|source| Box::new(Self::from_source(source)));
        info
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Severity used when computing the attention level
    pub fn severity(&self) -> LogLevel {
        self.level.unwrap_or(LogLevel::Error)
    }
}

fn short_type_name<E>() -> String {
    let full = std::any::type_name::<E>();
    // Strip module paths but keep generic arguments readable
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    short.to_string()
}

/// Source errors are type-erased; the Debug rendering usually starts with the type name
fn debug_type_name(error: &(dyn Error + 'static)) -> String {
    let rendered = format!("{:?}", error);
    let name: String = rendered
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

/// A log event emitted inside a request scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}
