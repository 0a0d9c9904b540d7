use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One outbound HTTP call made while serving a request
///
/// Produced by the HTTP client logging handler and stored in the request state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestLogContext {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl HttpRequestLogContext {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            route_template: None,
            status_code: None,
            duration_ms: 0.0,
            exception_type: None,
            exception_message: None,
            started_at: Utc::now(),
        }
    }
}

/// A downstream dependency as reported in the snapshot diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub target: String,
    pub kind: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: f64,
    pub success: bool,
}

impl From<&HttpRequestLogContext> for Dependency {
    fn from(call: &HttpRequestLogContext) -> Self {
        let target = call
            .route_template
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&call.url)
            .to_string();
        let failed_status = call.status_code.map(|s| s >= 500).unwrap_or(false);

        Self {
            target,
            kind: "Http".to_string(),
            method: call.method.clone(),
            status_code: call.status_code,
            duration_ms: call.duration_ms,
            success: !(failed_status || call.exception_type.is_some()),
        }
    }
}
