//! Command-event query interception
//!
//! An ORM adapter raises an event when a command finishes. Listeners receive
//! `executed` or `failed`; [`CommandInterceptor`] funnels both into
//! [`QueryInterceptor::on_query_completed`].

use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ConnectionInfo, QueryCompletion, QueryInterceptor, QueryParameters};
use crate::context::RequestState;

/// A finished database command as reported by the ORM adapter
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub sql: String,
    pub parameters: QueryParameters,
    pub connection: Arc<ConnectionInfo>,
    pub executed_at: DateTime<Utc>,
    pub duration: Duration,
}

impl CommandEvent {
    pub fn new(
        sql: impl Into<String>,
        parameters: QueryParameters,
        connection: Arc<ConnectionInfo>,
        duration: Duration,
    ) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            connection,
            executed_at: Utc::now(),
            duration,
        }
    }

    /// Start timing a command; finish with [`PendingCommand::finish`]
    pub fn start(
        sql: impl Into<String>,
        parameters: QueryParameters,
        connection: Arc<ConnectionInfo>,
    ) -> PendingCommand {
        PendingCommand {
            sql: sql.into(),
            parameters,
            connection,
            executed_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct PendingCommand {
    sql: String,
    parameters: QueryParameters,
    connection: Arc<ConnectionInfo>,
    executed_at: DateTime<Utc>,
    started: Instant,
}

impl PendingCommand {
    pub fn finish(self) -> CommandEvent {
        CommandEvent {
            duration: self.started.elapsed(),
            sql: self.sql,
            parameters: self.parameters,
            connection: self.connection,
            executed_at: self.executed_at,
        }
    }
}

pub trait CommandListener: Send + Sync {
    fn executed(&self, state: &RequestState, event: &CommandEvent);

    fn failed(&self, state: &RequestState, event: &CommandEvent, error: &(dyn Error + 'static));
}

#[derive(Debug, Clone)]
pub struct CommandInterceptor {
    interceptor: QueryInterceptor,
}

impl CommandInterceptor {
    pub fn new(interceptor: QueryInterceptor) -> Self {
        Self { interceptor }
    }

    fn completed(
        &self,
        state: &RequestState,
        event: &CommandEvent,
        error: Option<&dyn fmt::Display>,
    ) {
        self.interceptor.on_query_completed(
            state,
            &QueryCompletion {
                sql: &event.sql,
                parameters: &event.parameters,
                connection: &event.connection,
                duration: event.duration,
                executed_at: event.executed_at,
                error,
            },
        );
    }
}

impl CommandListener for CommandInterceptor {
    fn executed(&self, state: &RequestState, event: &CommandEvent) {
        self.completed(state, event, None);
    }

    fn failed(&self, state: &RequestState, event: &CommandEvent, error: &(dyn Error + 'static)) {
        self.completed(state, event, Some(&error));
    }
}

/// Listener registry the ORM adapter reports command outcomes to
#[derive(Clone, Default)]
pub struct CommandEvents {
    listeners: Vec<Arc<dyn CommandListener>>,
}

impl CommandEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn CommandListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn executed(&self, state: &RequestState, event: &CommandEvent) {
        for listener in &self.listeners {
            listener.executed(state, event);
        }
    }

    pub fn failed(&self, state: &RequestState, event: &CommandEvent, error: &(dyn Error + 'static)) {
        for listener in &self.listeners {
            listener.failed(state, event, error);
        }
    }

    /// Dispatch the outcome of a command result, returning the result unchanged
    pub fn report<T, E>(
        &self,
        state: &RequestState,
        event: &CommandEvent,
        result: Result<T, E>,
    ) -> Result<T, E>
    where
        E: Error + 'static,
    {
        match &result {
            Ok(_) => self.executed(state, event),
            Err(error) => self.failed(state, event, error),
        }
        result
    }
}

impl fmt::Debug for CommandEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEvents")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaptureOption, CaptureOptions};

    fn events(options: CaptureOptions) -> CommandEvents {
        let mut events = CommandEvents::new();
        events.register(Arc::new(CommandInterceptor::new(
            QueryInterceptor::with_options(true, options),
        )));
        events
    }

    fn event(sql: &str) -> CommandEvent {
        CommandEvent::new(
            sql,
            QueryParameters::new().with("id", 1),
            Arc::new(ConnectionInfo::parse("postgres://svc@db/orders")),
            Duration::from_millis(3),
        )
    }

    #[test]
    fn test_executed_and_failed_count_once_each() {
        let events = events(CaptureOptions::all());
        let state = RequestState::new("r");

        events.executed(&state, &event("SELECT 1"));
        let error = std::io::Error::new(std::io::ErrorKind::Other, "deadlock detected");
        events.failed(&state, &event("UPDATE orders SET x = 1"), &error);

        assert_eq!(state.query_count(), 2);
        let log = state.query_log();
        assert!(log[0].success);
        assert_eq!(log[0].parameters.as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(log[1].exception_message.as_deref(), Some("deadlock detected"));
        assert_eq!(log[1].database.as_deref(), Some("orders"));
    }

    #[test]
    fn test_report_passes_error_through() {
        let events = events(CaptureOptions::new([CaptureOption::None, CaptureOption::Query]));
        let state = RequestState::new("r");

        let pending = CommandEvent::start("SELECT 2", QueryParameters::new(), Arc::default());
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "statement timeout",
        ));
        let result = events.report(&state, &pending.finish(), result);

        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::TimedOut);
        assert_eq!(state.query_count(), 1);
        assert!(state.query_log().is_empty());
    }
}
