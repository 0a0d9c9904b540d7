//! Snapshot → wire payload
//!
//! The builder applies masking to every user-supplied region of the snapshot,
//! drops side-channel data whose feature flag is off, and derives the
//! attention level and error category.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{CollectorConfig, FeatureFlags};
use crate::masking::SensitiveDataMasker;
use crate::models::{
    AttentionLevel, DbQueryEntry, DiagnosticsPayload, ErrorCategory, ExceptionInfo,
    LogContextRequest, LogEntry, LogLevel, Notification, RequestBody, RequestPayload,
    ResponsePayload, Snapshot, UserPayload,
};

pub struct LogContextBuilder {
    masker: Arc<SensitiveDataMasker>,
    features: FeatureFlags,
    application_name: String,
    machine_name: String,
}

impl LogContextBuilder {
    pub fn new(
        masker: Arc<SensitiveDataMasker>,
        features: FeatureFlags,
        collector: &CollectorConfig,
    ) -> Self {
        Self {
            masker,
            features,
            application_name: collector.application_name.clone(),
            machine_name: machine_name(),
        }
    }

    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = name.into();
        self
    }

    pub fn build(&self, snapshot: &Snapshot) -> LogContextRequest {
        let masker = &*self.masker;
        let features = &self.features;

        let exception = features
            .exceptions
            .then(|| snapshot.exception.as_ref().map(|e| self.mask_exception(e)))
            .flatten();
        let notifications: Vec<Notification> = if features.notifications {
            snapshot.notifications.clone()
        } else {
            Vec::new()
        };
        let logs: Vec<LogEntry> = if features.logs {
            snapshot.log_entries.iter().map(|e| self.mask_log(e)).collect()
        } else {
            Vec::new()
        };
        let db_queries: Vec<DbQueryEntry> = if features.db_queries {
            snapshot.db_queries.iter().map(|q| self.mask_query(q)).collect()
        } else {
            Vec::new()
        };
        let (http_requests, dependencies) = if features.http_requests {
            (
                snapshot.http_requests.clone(),
                snapshot.diagnostics.dependencies.clone(),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let request = &snapshot.request;
        let response = &snapshot.response;
        let user = &snapshot.user;

        LogContextRequest {
            correlation_id: snapshot.correlation_id.clone(),
            application_name: self.application_name.clone(),
            machine_name: self.machine_name.clone(),
            started_at: snapshot.started_at,
            ended_at: snapshot.ended_at,
            elapsed_ms: snapshot.elapsed_ms,
            attention_level: attention_level(&notifications, exception.as_ref()),
            error_category: error_category(
                response.resolved_status_code,
                &notifications,
                exception.as_ref(),
            ),
            request: RequestPayload {
                method: request.method.clone(),
                path: request.path.clone(),
                query_string: request
                    .query_string
                    .as_deref()
                    .map(|q| self.mask_query_string(q)),
                headers: masker.mask_headers(&request.headers).into_owned(),
                body: request.body.as_ref().map(|b| self.mask_request_body(b)),
                cookies: masker.mask_headers(&request.cookies).into_owned(),
                ip_address: request.ip_address.clone(),
                user_agent: request.user_agent.clone(),
            },
            response: ResponsePayload {
                status_code: response.status_code,
                resolved_status_code: response.resolved_status_code,
                headers: masker.mask_headers(&response.headers).into_owned(),
                body: response.body.as_deref().map(|b| self.mask_text_body(b)),
                size: response.size,
            },
            user: UserPayload {
                is_authenticated: user.is_authenticated,
                user_id: user.user_id.clone(),
                user_name: user.user_name.clone(),
                email: user.email.clone(),
                client_id: user.client_id.clone(),
                account_id: user.account_id.clone(),
                account_code: user.account_code.clone(),
                claims: masker.mask_headers(&user.claims).into_owned(),
            },
            diagnostics: DiagnosticsPayload {
                memory_bytes: snapshot.diagnostics.memory_bytes,
                db_query_count: snapshot.diagnostics.db_query_count,
                served_from_cache: snapshot.diagnostics.served_from_cache,
                dependencies,
            },
            exception,
            notifications,
            logs,
            db_queries,
            http_requests,
        }
    }

    fn mask_request_body(&self, body: &RequestBody) -> Value {
        match body {
            RequestBody::Json(json) => self.masker.mask_json(json).into_owned(),
            RequestBody::Text(text) => Value::String(self.masker.mask_str(text).into_owned()),
            RequestBody::Form(pairs) => {
                let masked = self.masker.mask_pairs(pairs);
                let map: Map<String, Value> = masked
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                Value::Object(map)
            }
        }
    }

    /// Masked response text, embedded as JSON when it parses
    fn mask_text_body(&self, body: &str) -> Value {
        let masked = self.masker.mask_str(body);
        serde_json::from_str(&masked).unwrap_or_else(|_| Value::String(masked.into_owned()))
    }

    fn mask_query_string(&self, query: &str) -> String {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        match self.masker.mask_pairs(&pairs) {
            std::borrow::Cow::Borrowed(_) => query.to_string(),
            std::borrow::Cow::Owned(masked) => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(masked.iter())
                .finish(),
        }
    }

    fn mask_exception(&self, exception: &ExceptionInfo) -> ExceptionInfo {
        ExceptionInfo {
            message: self.masker.mask_str(&exception.message).into_owned(),
            inner: exception
                .inner
                .as_ref()
                .map(|inner| Box::new(self.mask_exception(inner))),
            ..exception.clone()
        }
    }

    fn mask_log(&self, entry: &LogEntry) -> LogEntry {
        let fields = Value::Object(entry.fields.clone());
        let fields = match self.masker.mask_json(&fields).into_owned() {
            Value::Object(map) => map,
            _ => entry.fields.clone(),
        };
        LogEntry {
            message: self.masker.mask_str(&entry.message).into_owned(),
            fields,
            ..entry.clone()
        }
    }

    fn mask_query(&self, query: &DbQueryEntry) -> DbQueryEntry {
        DbQueryEntry {
            parameters: query
                .parameters
                .as_deref()
                .map(|p| self.masker.mask_str(p).into_owned()),
            ..query.clone()
        }
    }
}

fn machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Highest severity among notifications and the exception
pub fn attention_level(
    notifications: &[Notification],
    exception: Option<&ExceptionInfo>,
) -> AttentionLevel {
    notifications
        .iter()
        .map(|n| n.level)
        .chain(exception.map(ExceptionInfo::severity))
        .max()
        .map(AttentionLevel::from)
        .unwrap_or(AttentionLevel::None)
}

pub fn error_category(
    resolved_status: u16,
    notifications: &[Notification],
    exception: Option<&ExceptionInfo>,
) -> ErrorCategory {
    if exception.is_some() {
        ErrorCategory::Exception
    } else if resolved_status >= 500 {
        ErrorCategory::ServerError
    } else if resolved_status >= 400 {
        ErrorCategory::ClientError
    } else if notifications.iter().any(|n| n.level >= LogLevel::Warning) {
        ErrorCategory::Notification
    } else {
        ErrorCategory::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaskingConfig;
    use crate::models::{
        Diagnostics, HttpRequestLogContext, RequestSnapshot, ResponseSnapshot, UserSnapshot,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn builder(features: FeatureFlags) -> LogContextBuilder {
        let masker = SensitiveDataMasker::new(&MaskingConfig::default()).unwrap();
        LogContextBuilder::new(Arc::new(masker), features, &CollectorConfig::default())
            .with_machine_name("pod-a")
    }

    fn snapshot() -> Snapshot {
        let now = Utc::now();
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer abc".to_string());
        headers.insert("accept".to_string(), "*/*".to_string());

        Snapshot {
            correlation_id: "corr-1".to_string(),
            started_at: now,
            ended_at: now,
            elapsed_ms: 3.0,
            request: RequestSnapshot {
                method: "POST".to_string(),
                path: "/login".to_string(),
                query_string: Some("user=ana&password=hunter2".to_string()),
                headers,
                body: Some(RequestBody::Json(json!({"user": "ana", "password": "p"}))),
                ip_address: "127.0.0.1".to_string(),
                ..RequestSnapshot::default()
            },
            response: ResponseSnapshot {
                status_code: 200,
                resolved_status_code: 200,
                body: Some(r#"{"token":"t","ok":true}"#.to_string()),
                size: 23,
                ..ResponseSnapshot::default()
            },
            user: UserSnapshot::default(),
            diagnostics: Diagnostics::default(),
            log_entries: Vec::new(),
            notifications: vec![Notification::new(LogLevel::Warning, "stock", "low")],
            exception: None,
            db_queries: Vec::new(),
            http_requests: vec![HttpRequestLogContext::new("GET", "https://inventory/items")],
        }
    }

    #[test]
    fn test_payload_is_masked() {
        let payload = builder(FeatureFlags::default()).build(&snapshot());

        assert_eq!(payload.machine_name, "pod-a");
        assert_eq!(payload.request.headers["authorization"], "***");
        assert_eq!(payload.request.headers["accept"], "*/*");
        assert_eq!(payload.request.body, Some(json!({"user": "ana", "password": "***"})));
        assert_eq!(
            payload.request.query_string.as_deref(),
            Some("user=ana&password=***")
        );
        assert_eq!(payload.response.body, Some(json!({"token": "***", "ok": true})));
    }

    #[test]
    fn test_feature_flags_filter_side_channels() {
        let features = FeatureFlags {
            notifications: false,
            http_requests: false,
            ..FeatureFlags::default()
        };
        let payload = builder(features).build(&snapshot());

        assert!(payload.notifications.is_empty());
        assert!(payload.http_requests.is_empty());
        assert_eq!(payload.attention_level, AttentionLevel::None);
        assert_eq!(payload.error_category, ErrorCategory::None);
    }

    #[test]
    fn test_attention_and_category() {
        let warn = vec![Notification::new(LogLevel::Warning, "k", "v")];
        let debug = vec![Notification::new(LogLevel::Debug, "k", "v")];
        let exception = ExceptionInfo::new("Timeout", "upstream");

        assert_eq!(attention_level(&warn, None), AttentionLevel::Warning);
        assert_eq!(attention_level(&debug, None), AttentionLevel::None);
        assert_eq!(attention_level(&warn, Some(&exception)), AttentionLevel::Error);
        assert_eq!(
            attention_level(&[], Some(&exception.clone().with_level(LogLevel::Critical))),
            AttentionLevel::Critical
        );

        assert_eq!(error_category(200, &warn, Some(&exception)), ErrorCategory::Exception);
        assert_eq!(error_category(503, &warn, None), ErrorCategory::ServerError);
        assert_eq!(error_category(404, &warn, None), ErrorCategory::ClientError);
        assert_eq!(error_category(200, &warn, None), ErrorCategory::Notification);
        assert_eq!(error_category(200, &debug, None), ErrorCategory::None);
    }
}
