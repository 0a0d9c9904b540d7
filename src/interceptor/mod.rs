//! Database query interception
//!
//! Two adapters feed the same completion callback:
//! - [`command`]: explicit `executed` / `failed` events raised by an ORM
//!   adapter layer
//! - [`connection`]: a decorating connection whose generic `execute` funnel
//!   times the call and reports the outcome
//!
//! Every completed query increments the request's query counter exactly once.
//! A [`DbQueryEntry`] is appended only when the interceptor is enabled and its
//! [`CaptureOptions`] are not disabled.

pub mod command;
pub mod connection;
pub mod connection_info;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::config::InterceptorConfig;
use crate::context::RequestState;
use crate::models::{CaptureOption, CaptureOptions, DbQueryEntry};

pub use command::{CommandEvent, CommandEvents, CommandInterceptor, CommandListener};
pub use connection::{execute, execute_blocking, CountingConnection, Queryable, Raw};
pub use connection_info::ConnectionInfo;

/// Ordered bound parameters of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameters(Vec<(String, Value)>);

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named parameter; values that fail to serialize are recorded as null
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.push((name.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// JSON object text of the parameters, or an empty string when there are none
    pub fn to_capture_string(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let map: Map<String, Value> = self.0.iter().cloned().collect();
        Value::Object(map).to_string()
    }
}

/// Everything known about one finished query
pub struct QueryCompletion<'a> {
    pub sql: &'a str,
    pub parameters: &'a QueryParameters,
    pub connection: &'a ConnectionInfo,
    pub duration: Duration,
    pub executed_at: DateTime<Utc>,
    pub error: Option<&'a dyn fmt::Display>,
}

#[derive(Debug, Clone)]
pub struct QueryInterceptor {
    enabled: bool,
    capture: CaptureOptions,
}

impl QueryInterceptor {
    pub fn new(config: &InterceptorConfig) -> Self {
        Self {
            enabled: config.enabled,
            capture: config.capture.clone(),
        }
    }

    pub fn with_options(enabled: bool, capture: CaptureOptions) -> Self {
        Self { enabled, capture }
    }

    pub fn is_capturing(&self) -> bool {
        self.enabled && !self.capture.is_disabled()
    }

    pub fn on_query_completed(&self, state: &RequestState, completion: &QueryCompletion<'_>) {
        state.increment_query_count();

        if !self.is_capturing() {
            return;
        }

        let capture = &self.capture;
        let connection = completion.connection;
        let with_context = capture.contains(CaptureOption::Context);
        let context = |field: &Option<String>| if with_context { field.clone() } else { None };

        let entry = DbQueryEntry {
            query: capture
                .contains(CaptureOption::Query)
                .then(|| completion.sql.to_string()),
            parameters: capture
                .contains(CaptureOption::Parameters)
                .then(|| completion.parameters.to_capture_string()),
            duration_ms: completion.duration.as_secs_f64() * 1000.0,
            success: completion.error.is_none(),
            exception_message: capture.contains(CaptureOption::ExceptionMessage).then(|| {
                completion
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            }),
            provider: context(&connection.provider),
            database: context(&connection.database),
            data_source: context(&connection.data_source),
            user_id: context(&connection.user_id),
            service_name: context(&connection.service_name),
            context_name: context(&connection.context_name),
            executed_at: completion.executed_at,
        };

        tracing::trace!(
            request_id = %state.request_id(),
            duration_ms = entry.duration_ms,
            success = entry.success,
            "Query captured"
        );
        state.record_query(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion<'a>(
        params: &'a QueryParameters,
        connection: &'a ConnectionInfo,
        error: Option<&'a dyn fmt::Display>,
    ) -> QueryCompletion<'a> {
        QueryCompletion {
            sql: "SELECT * FROM items WHERE id = @id",
            parameters: params,
            connection,
            duration: Duration::from_millis(4),
            executed_at: Utc::now(),
            error,
        }
    }

    #[test]
    fn test_counts_without_capture() {
        let state = RequestState::new("r");
        let params = QueryParameters::new();
        let info = ConnectionInfo::default();

        for options in [CaptureOptions::new([]), CaptureOptions::none()] {
            let interceptor = QueryInterceptor::with_options(true, options);
            interceptor.on_query_completed(&state, &completion(&params, &info, None));
        }
        QueryInterceptor::with_options(false, CaptureOptions::all())
            .on_query_completed(&state, &completion(&params, &info, None));

        assert_eq!(state.query_count(), 3);
        assert!(state.query_log().is_empty());
    }

    #[test]
    fn test_fields_follow_options() {
        let state = RequestState::new("r");
        let params = QueryParameters::new().with("id", 7);
        let info = ConnectionInfo::parse("sqlite://items.db").with_context_name("ItemsDb");

        QueryInterceptor::with_options(true, CaptureOptions::new([CaptureOption::Query]))
            .on_query_completed(&state, &completion(&params, &info, None));

        let entry = &state.query_log()[0];
        assert_eq!(entry.query.as_deref(), Some("SELECT * FROM items WHERE id = @id"));
        assert_eq!(entry.parameters, None);
        assert_eq!(entry.exception_message, None);
        assert_eq!(entry.database, None);
        assert!(entry.success);
    }

    #[test]
    fn test_all_options_on_failure() {
        let state = RequestState::new("r");
        let params = QueryParameters::new();
        let info = ConnectionInfo::parse("sqlite://items.db").with_context_name("ItemsDb");
        let error = "no such table: items";

        QueryInterceptor::with_options(true, CaptureOptions::all())
            .on_query_completed(&state, &completion(&params, &info, Some(&error)));

        let entry = &state.query_log()[0];
        assert!(!entry.success);
        assert_eq!(entry.parameters.as_deref(), Some(""));
        assert_eq!(entry.exception_message.as_deref(), Some("no such table: items"));
        assert_eq!(entry.provider.as_deref(), Some("sqlite"));
        assert_eq!(entry.context_name.as_deref(), Some("ItemsDb"));
        assert_eq!(state.query_count(), 1);
    }

    #[test]
    fn test_exception_message_empty_on_success() {
        let state = RequestState::new("r");
        let params = QueryParameters::new().with("name", "widget");
        let info = ConnectionInfo::default();

        QueryInterceptor::with_options(
            true,
            CaptureOptions::new([CaptureOption::Parameters, CaptureOption::ExceptionMessage]),
        )
        .on_query_completed(&state, &completion(&params, &info, None));

        let entry = &state.query_log()[0];
        assert_eq!(entry.exception_message.as_deref(), Some(""));
        assert_eq!(entry.parameters.as_deref(), Some(r#"{"name":"widget"}"#));
    }
}
