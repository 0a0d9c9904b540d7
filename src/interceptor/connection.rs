//! Connection-decorator query interception
//!
//! [`CountingConnection`] wraps any connection or pool. Queries go through one
//! generic funnel, [`execute`] (async) or [`execute_blocking`], which hands
//! the wrapped connection to a caller-supplied closure, times it and reports
//! the outcome to the [`QueryInterceptor`]. The closure's result, including
//! its error, is returned untouched.
//!
//! An undecorated connection (a bare `sqlx::Pool`, or anything wrapped in
//! [`Raw`]) can be passed through the same funnel: the query runs normally but
//! is neither counted nor captured, and a warning is logged.

use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use super::{ConnectionInfo, QueryCompletion, QueryInterceptor, QueryParameters};
use crate::context::RequestState;

/// A connection that can be handed to the query funnel
pub trait Queryable {
    type Inner: ?Sized;

    fn inner(&self) -> &Self::Inner;

    /// Interceptor and connection metadata, `None` for undecorated connections
    fn instrumentation(&self) -> Option<(&QueryInterceptor, &ConnectionInfo)>;
}

#[derive(Debug, Clone)]
pub struct CountingConnection<C> {
    inner: C,
    info: Arc<ConnectionInfo>,
    interceptor: QueryInterceptor,
}

impl<C> CountingConnection<C> {
    pub fn new(inner: C, info: ConnectionInfo, interceptor: QueryInterceptor) -> Self {
        Self {
            inner,
            info: Arc::new(info),
            interceptor,
        }
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    pub async fn execute<'a, T, E, F, Fut>(
        &'a self,
        state: &RequestState,
        sql: &'a str,
        parameters: &QueryParameters,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&'a C, &'a str) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        execute(self, state, sql, parameters, f).await
    }

    pub fn execute_blocking<'a, T, E, F>(
        &'a self,
        state: &RequestState,
        sql: &'a str,
        parameters: &QueryParameters,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&'a C, &'a str) -> Result<T, E>,
        E: fmt::Display,
    {
        execute_blocking(self, state, sql, parameters, f)
    }
}

impl<C> Queryable for CountingConnection<C> {
    type Inner = C;

    fn inner(&self) -> &C {
        &self.inner
    }

    fn instrumentation(&self) -> Option<(&QueryInterceptor, &ConnectionInfo)> {
        Some((&self.interceptor, &self.info))
    }
}

impl<DB: sqlx::Database> Queryable for sqlx::Pool<DB> {
    type Inner = Self;

    fn inner(&self) -> &Self {
        self
    }

    fn instrumentation(&self) -> Option<(&QueryInterceptor, &ConnectionInfo)> {
        None
    }
}

/// Marks any connection as undecorated so it can use the funnel
#[derive(Debug, Clone, Copy)]
pub struct Raw<C>(pub C);

impl<C> Queryable for Raw<C> {
    type Inner = C;

    fn inner(&self) -> &C {
        &self.0
    }

    fn instrumentation(&self) -> Option<(&QueryInterceptor, &ConnectionInfo)> {
        None
    }
}

pub async fn execute<'a, Q, T, E, F, Fut>(
    connection: &'a Q,
    state: &RequestState,
    sql: &'a str,
    parameters: &QueryParameters,
    f: F,
) -> Result<T, E>
where
    Q: Queryable + ?Sized,
    F: FnOnce(&'a Q::Inner, &'a str) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let Some((interceptor, info)) = connection.instrumentation() else {
        warn_undecorated(state);
        return f(connection.inner(), sql).await;
    };

    let executed_at = Utc::now();
    let started = Instant::now();
    let result = f(connection.inner(), sql).await;

    interceptor.on_query_completed(
        state,
        &QueryCompletion {
            sql,
            parameters,
            connection: info,
            duration: started.elapsed(),
            executed_at,
            error: result.as_ref().err().map(|e| e as &dyn fmt::Display),
        },
    );
    result
}

pub fn execute_blocking<'a, Q, T, E, F>(
    connection: &'a Q,
    state: &RequestState,
    sql: &'a str,
    parameters: &QueryParameters,
    f: F,
) -> Result<T, E>
where
    Q: Queryable + ?Sized,
    F: FnOnce(&'a Q::Inner, &'a str) -> Result<T, E>,
    E: fmt::Display,
{
    let Some((interceptor, info)) = connection.instrumentation() else {
        warn_undecorated(state);
        return f(connection.inner(), sql);
    };

    let executed_at = Utc::now();
    let started = Instant::now();
    let result = f(connection.inner(), sql);

    interceptor.on_query_completed(
        state,
        &QueryCompletion {
            sql,
            parameters,
            connection: info,
            duration: started.elapsed(),
            executed_at,
            error: result.as_ref().err().map(|e| e as &dyn fmt::Display),
        },
    );
    result
}

fn warn_undecorated(state: &RequestState) {
    tracing::warn!(
        request_id = %state.request_id(),
        "Query executed on an undecorated connection, it will not be counted or captured"
    );
}
