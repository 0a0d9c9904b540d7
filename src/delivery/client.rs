//! Collector HTTP client
//!
//! One POST per payload, no retries. Failures are logged and reported as a
//! [`FlushOutcome`]; they never propagate to the caller.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::{Duration, Instant};

use crate::config::CollectorConfig;
use crate::error::{AgentError, TransportError};
use crate::models::{ErrorResponse, LogContextRequest};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const USER_AGENT_HEADER: &str = "user-agent";
pub const POD_NAME_HEADER: &str = "x-pod-name";
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const ACCOUNT_CODE_HEADER: &str = "x-account-code";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Delivered,
    /// The collector answered with a non-success status
    Rejected(u16),
    /// The request never got a response
    Failed,
}

impl FlushOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Rejected(_) => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: Client,
    url: String,
    application_name: String,
    account_id: Option<String>,
    account_code: Option<String>,
}

impl DeliveryClient {
    pub fn new(config: &CollectorConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &CollectorConfig) -> Self {
        Self {
            client,
            url: config.url(),
            application_name: config.application_name.clone(),
            account_id: config.account_id.clone(),
            account_code: config.account_code.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn flush(&self, payload: &LogContextRequest) -> FlushOutcome {
        let start = Instant::now();

        let outcome = match self.send(payload).await {
            Ok(()) => {
                tracing::debug!(correlation_id = %payload.correlation_id, "Log context delivered");
                FlushOutcome::Delivered
            }
            Err(e @ TransportError::Http { .. }) => {
                tracing::warn!(
                    correlation_id = %payload.correlation_id,
                    error = %e,
                    "Log context delivery failed"
                );
                FlushOutcome::Failed
            }
            Err(e) => {
                tracing::error!(
                    correlation_id = %payload.correlation_id,
                    status = e.status().unwrap_or_default(),
                    error = %e,
                    "Log context rejected by collector"
                );
                FlushOutcome::Rejected(e.status().unwrap_or_default())
            }
        };

        crate::metrics::record_delivery(outcome.label(), start.elapsed());
        outcome
    }

    async fn send(&self, payload: &LogContextRequest) -> Result<(), TransportError> {
        let transport = |source| TransportError::Http {
            method: "POST".to_string(),
            uri: self.url.clone(),
            source,
        };

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers(payload))
            .json(payload)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.bytes().await.map_err(transport)?;
        match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(error_response) => Err(TransportError::Rejected {
                method: "POST".to_string(),
                uri: self.url.clone(),
                status: status.as_u16(),
                response: error_response,
            }),
            Err(source) => Err(TransportError::MalformedErrorResponse {
                method: "POST".to_string(),
                uri: self.url.clone(),
                status: status.as_u16(),
                source,
            }),
        }
    }

    /// Context headers sent with every payload
    pub fn headers(&self, payload: &LogContextRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let client_id = match payload.user.client_id.as_deref().filter(|c| !c.is_empty()) {
            Some(existing) => format!("{},{}", existing, self.application_name),
            None => self.application_name.clone(),
        };
        let user_agent = payload
            .request
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));

        let values = [
            (FORWARDED_FOR_HEADER, Some(payload.request.ip_address.clone())),
            (USER_ID_HEADER, payload.user.user_id.clone()),
            (CORRELATION_ID_HEADER, Some(payload.correlation_id.clone())),
            (CLIENT_ID_HEADER, Some(client_id)),
            (USER_AGENT_HEADER, Some(user_agent)),
            (POD_NAME_HEADER, Some(payload.machine_name.clone())),
            (
                ACCOUNT_ID_HEADER,
                payload.user.account_id.clone().or_else(|| self.account_id.clone()),
            ),
            (
                ACCOUNT_CODE_HEADER,
                payload.user.account_code.clone().or_else(|| self.account_code.clone()),
            ),
        ];

        for (name, value) in values {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(e) => {
                    tracing::debug!(header = name, error = %e, "Skipping invalid header value");
                }
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttentionLevel, DiagnosticsPayload, ErrorCategory, RequestPayload, ResponsePayload,
        UserPayload,
    };
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> LogContextRequest {
        let now = Utc::now();
        LogContextRequest {
            correlation_id: "corr-7".to_string(),
            application_name: "orders-api".to_string(),
            machine_name: "pod-1".to_string(),
            started_at: now,
            ended_at: now,
            elapsed_ms: 4.0,
            attention_level: AttentionLevel::None,
            error_category: ErrorCategory::None,
            request: RequestPayload {
                method: "GET".to_string(),
                path: "/orders".to_string(),
                ip_address: "203.0.113.9".to_string(),
                user_agent: Some("curl/8".to_string()),
                ..RequestPayload::default()
            },
            response: ResponsePayload::default(),
            user: UserPayload {
                user_id: Some("u-1".to_string()),
                client_id: Some("mobile".to_string()),
                ..UserPayload::default()
            },
            diagnostics: DiagnosticsPayload::default(),
            exception: None,
            notifications: Vec::new(),
            logs: Vec::new(),
            db_queries: Vec::new(),
            http_requests: Vec::new(),
        }
    }

    fn client(base_url: &str) -> DeliveryClient {
        DeliveryClient::new(&CollectorConfig {
            base_url: base_url.to_string(),
            endpoint: "/api/log-context".to_string(),
            timeout_seconds: 2,
            application_name: "orders-api".to_string(),
            account_id: Some("acc-1".to_string()),
            account_code: None,
        })
        .unwrap()
    }

    #[test]
    fn test_context_headers() {
        let headers = client("http://collector").headers(&payload());

        assert_eq!(headers[FORWARDED_FOR_HEADER], "203.0.113.9");
        assert_eq!(headers[USER_ID_HEADER], "u-1");
        assert_eq!(headers[CORRELATION_ID_HEADER], "corr-7");
        assert_eq!(headers[CLIENT_ID_HEADER], "mobile,orders-api");
        assert_eq!(headers[USER_AGENT_HEADER], "curl/8");
        assert_eq!(headers[POD_NAME_HEADER], "pod-1");
        assert_eq!(headers[ACCOUNT_ID_HEADER], "acc-1");
        assert!(headers.get(ACCOUNT_CODE_HEADER).is_none());
    }

    #[test]
    fn test_client_id_defaults_to_application_name() {
        let mut payload = payload();
        payload.user.client_id = None;
        let headers = client("http://collector").headers(&payload);
        assert_eq!(headers[CLIENT_ID_HEADER], "orders-api");
    }

    #[tokio::test]
    async fn test_flush_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/log-context"))
            .and(header("x-correlation-id", "corr-7"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server.uri()).flush(&payload()).await;
        assert_eq!(outcome, FlushOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_flush_rejected_with_issues() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "correlationId": "corr-7",
                "issues": [{"type": "Validation", "descriptionType": "MissingField", "title": "path"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let error = client.send(&payload()).await.unwrap_err();
        match &error {
            TransportError::Rejected { status, response, .. } => {
                assert_eq!(*status, 400);
                assert_eq!(response.issues.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.flush(&payload()).await, FlushOutcome::Rejected(400));
    }

    #[tokio::test]
    async fn test_flush_malformed_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let error = client.send(&payload()).await.unwrap_err();
        assert!(matches!(
            error,
            TransportError::MalformedErrorResponse { status: 500, .. }
        ));
        assert_eq!(client.flush(&payload()).await, FlushOutcome::Rejected(500));
    }

    #[tokio::test]
    async fn test_flush_unreachable_collector() {
        let outcome = client("http://127.0.0.1:9").flush(&payload()).await;
        assert_eq!(outcome, FlushOutcome::Failed);
    }
}
