use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::ErrorResponse;

/// Errors raised while assembling or running the telemetry agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// A configured masking pattern is not a valid regex
    #[error("Invalid mask pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// Payload serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The agent must be started inside a tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Reasons a snapshot could not be handed to the delivery queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("delivery queue is full")]
    Full,
    #[error("timed out waiting for delivery queue capacity")]
    Timeout,
    #[error("delivery queue has been completed")]
    Completed,
}

impl EnqueueError {
    /// Label used for the dropped-snapshot metric
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Timeout => "timeout",
            Self::Completed => "completed",
        }
    }
}

/// Failures talking to the remote collector
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection, timeout or protocol failure
    #[error("{method} {uri} failed: {source}")]
    Http {
        method: String,
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    /// The collector answered with a structured error payload
    #[error(
        "{method} {uri} was rejected with status {status} (correlation id: {}, issues: {})",
        .response.correlation_id.as_deref().unwrap_or("-"),
        .response.issues.len()
    )]
    Rejected {
        method: String,
        uri: String,
        status: u16,
        response: ErrorResponse,
    },
    /// The collector answered with an error body that could not be parsed
    #[error("{method} {uri} returned status {status} with an unreadable error body: {source}")]
    MalformedErrorResponse {
        method: String,
        uri: String,
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { source, .. } => source.status().map(|s| s.as_u16()),
            Self::Rejected { status, .. } | Self::MalformedErrorResponse { status, .. } => {
                Some(*status)
            }
        }
    }
}

/// Error type for the demo host handlers
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::NotFound(_) => "not_found",
        AppError::Database(_) => "database_error",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::NotFound("item 7".to_string());
        assert_eq!(error.to_string(), "Not found: item 7");
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(error_type_name(&AppError::NotFound("x".to_string())), "not_found");
        assert_eq!(
            error_type_name(&AppError::InternalError("x".to_string())),
            "internal_error"
        );
    }

    #[tokio::test]
    async fn test_error_response() {
        let response = AppError::NotFound("item".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rejected_display_includes_correlation_id() {
        let error = TransportError::Rejected {
            method: "POST".to_string(),
            uri: "http://collector/logs".to_string(),
            status: 422,
            response: ErrorResponse {
                correlation_id: Some("abc-123".to_string()),
                issues: Vec::new(),
            },
        };
        let text = error.to_string();
        assert!(text.contains("abc-123"));
        assert!(text.contains("422"));
        assert_eq!(error.status(), Some(422));
    }

    #[test]
    fn test_enqueue_error_reason() {
        assert_eq!(EnqueueError::Timeout.reason(), "timeout");
        assert_eq!(EnqueueError::Completed.to_string(), "delivery queue has been completed");
    }
}
