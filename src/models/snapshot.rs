use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::{
    Dependency, DbQueryEntry, ExceptionInfo, HttpRequestLogContext, LogEntry, Notification,
};

/// Everything observed about one request/response cycle
///
/// Built once by `SnapshotCapture::capture` and only read afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    pub user: UserSnapshot,
    pub diagnostics: Diagnostics,
    pub log_entries: Vec<LogEntry>,
    pub notifications: Vec<Notification>,
    pub exception: Option<ExceptionInfo>,
    pub db_queries: Vec<DbQueryEntry>,
    pub http_requests: Vec<HttpRequestLogContext>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub method: String,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    pub cookies: HashMap<String, String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
}

/// Captured request body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Body parsed as JSON
    Json(serde_json::Value),
    /// Body that is not valid JSON, kept verbatim
    Text(String),
    /// Form fields in submission order, followed by uploaded-file metadata
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    /// Status code as written by the application
    pub status_code: u16,
    /// Effective status after override and error-redirect rules
    pub resolved_status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub is_authenticated: bool,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub client_id: Option<String>,
    pub account_id: Option<String>,
    pub account_code: Option<String>,
    pub claims: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub memory_bytes: u64,
    pub db_query_count: u64,
    pub served_from_cache: bool,
    pub dependencies: Vec<Dependency>,
}
