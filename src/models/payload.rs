use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    Dependency, DbQueryEntry, ExceptionInfo, HttpRequestLogContext, LogEntry, LogLevel,
    Notification,
};

/// Derived severity of a request, from its notifications and exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttentionLevel {
    None,
    Information,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for AttentionLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace | LogLevel::Debug => Self::None,
            LogLevel::Information => Self::Information,
            LogLevel::Warning => Self::Warning,
            LogLevel::Error => Self::Error,
            LogLevel::Critical => Self::Critical,
        }
    }
}

/// Coarse classification of what went wrong, if anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    None,
    Notification,
    ClientError,
    ServerError,
    Exception,
}

/// Payload posted to the collector for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogContextRequest {
    pub correlation_id: String,
    pub application_name: String,
    pub machine_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub attention_level: AttentionLevel,
    pub error_category: ErrorCategory,
    pub request: RequestPayload,
    pub response: ResponsePayload,
    pub user: UserPayload,
    pub diagnostics: DiagnosticsPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    pub notifications: Vec<Notification>,
    pub logs: Vec<LogEntry>,
    pub db_queries: Vec<DbQueryEntry>,
    pub http_requests: Vec<HttpRequestLogContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub cookies: HashMap<String, String>,
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status_code: u16,
    pub resolved_status_code: u16,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_code: Option<String>,
    pub claims: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsPayload {
    pub memory_bytes: u64,
    pub db_query_count: u64,
    pub served_from_cache: bool,
    pub dependencies: Vec<Dependency>,
}
