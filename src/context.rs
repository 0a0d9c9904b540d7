//! Request-scoped telemetry state
//!
//! One `RequestState` is created per request by the capture middleware and
//! carried as `Arc<RequestState>` in the request extensions. Collaborators
//! (query interceptors, the log capture layer, outbound HTTP logging, error
//! handlers) append to its slots; the snapshot is read from it once the
//! response is complete.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capture::identity::Principal;
use crate::models::{
    DbQueryEntry, ExceptionInfo, HttpRequestLogContext, LogEntry, LogLevel, Notification,
};

/// Response body handed over by the body-buffering step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedResponseBody {
    pub content: Option<String>,
    pub size: u64,
}

/// Process-unique key identifying one live request to the log capture layer
///
/// Distinct from the correlation id, which the client controls and may reuse
/// across concurrent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureKey(u64);

static NEXT_CAPTURE_KEY: AtomicU64 = AtomicU64::new(1);

impl CaptureKey {
    fn next() -> Self {
        Self(NEXT_CAPTURE_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for CaptureKey {
    fn default() -> Self {
        Self::next()
    }
}

#[derive(Debug, Default)]
pub struct RequestState {
    request_id: String,
    capture_key: CaptureKey,
    query_count: AtomicU64,
    served_from_cache: AtomicBool,
    query_log: Mutex<Vec<DbQueryEntry>>,
    notifications: Mutex<Vec<Notification>>,
    exception: Mutex<Option<ExceptionInfo>>,
    log_entries: Mutex<Vec<LogEntry>>,
    http_requests: Mutex<Vec<HttpRequestLogContext>>,
    response_body: Mutex<Option<CapturedResponseBody>>,
    principal: Mutex<Option<Principal>>,
}

// A panic while holding a slot lock must not take telemetry down with it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RequestState {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    pub fn shared(request_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(request_id))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn capture_key(&self) -> CaptureKey {
        self.capture_key
    }

    // --- database ---

    pub fn increment_query_count(&self) -> u64 {
        self.query_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    pub fn record_query(&self, entry: DbQueryEntry) {
        lock(&self.query_log).push(entry);
    }

    pub fn query_log(&self) -> Vec<DbQueryEntry> {
        lock(&self.query_log).clone()
    }

    pub fn take_query_log(&self) -> Vec<DbQueryEntry> {
        std::mem::take(&mut *lock(&self.query_log))
    }

    // --- cache ---

    pub fn mark_cache_hit(&self) {
        self.served_from_cache.store(true, Ordering::Relaxed);
    }

    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache.load(Ordering::Relaxed)
    }

    // --- notifications & errors ---

    pub fn add_notification(&self, notification: Notification) {
        lock(&self.notifications).push(notification);
    }

    pub fn notify(&self, level: LogLevel, key: impl Into<String>, value: impl Into<String>) {
        self.add_notification(Notification::new(level, key, value));
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *lock(&self.notifications))
    }

    /// Record a Rust error as the request's exception, keeping the first one
    pub fn capture_error<E>(&self, error: &E)
    where
        E: std::error::Error + 'static,
    {
        let mut slot = lock(&self.exception);
        if slot.is_none() {
            *slot = Some(ExceptionInfo::from_error(error));
        }
    }

    pub fn set_exception(&self, exception: ExceptionInfo) {
        *lock(&self.exception) = Some(exception);
    }

    pub fn exception(&self) -> Option<ExceptionInfo> {
        lock(&self.exception).clone()
    }

    pub fn take_exception(&self) -> Option<ExceptionInfo> {
        lock(&self.exception).take()
    }

    // --- logs ---

    pub fn add_log_entry(&self, entry: LogEntry) {
        lock(&self.log_entries).push(entry);
    }

    pub fn take_log_entries(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *lock(&self.log_entries))
    }

    // --- outbound http ---

    pub fn record_http_request(&self, context: HttpRequestLogContext) {
        lock(&self.http_requests).push(context);
    }

    pub fn take_http_requests(&self) -> Vec<HttpRequestLogContext> {
        std::mem::take(&mut *lock(&self.http_requests))
    }

    // --- response body ---

    pub fn set_response_body(&self, body: CapturedResponseBody) {
        *lock(&self.response_body) = Some(body);
    }

    pub fn take_response_body(&self) -> Option<CapturedResponseBody> {
        lock(&self.response_body).take()
    }

    // --- identity ---

    pub fn set_principal(&self, principal: Principal) {
        *lock(&self.principal) = Some(principal);
    }

    pub fn principal(&self) -> Option<Principal> {
        lock(&self.principal).clone()
    }
}
