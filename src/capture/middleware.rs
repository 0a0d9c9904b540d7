use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    RequestExt,
};
use chrono::Utc;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::body::{capture_response_body, extract_request_body};
use super::identity::Principal;
use super::snapshot::{RequestContext, RequestHead, ResponseHead};
use crate::agent::TelemetryAgent;
use crate::context::RequestState;
use crate::delivery::client::CORRELATION_ID_HEADER;

/// Capture middleware
///
/// Install with `axum::middleware::from_fn_with_state(agent, telemetry_middleware)`.
/// Handlers reach the request state through `Extension<Arc<RequestState>>`.
///
/// The request body is read under the host's `DefaultBodyLimit`. When either
/// body fails to buffer, the bytes read so far and the error are handed on
/// unchanged and that body is left out of the snapshot.
pub async fn telemetry_middleware(
    State(agent): State<TelemetryAgent>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let state = RequestState::shared(request_id);

    let span = tracing::info_span!(
        "http_request",
        request_id = %state.request_id(),
        capture_key = state.capture_key().as_u64(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    capture_exchange(agent, state, request, next)
        .instrument(span)
        .await
}

async fn capture_exchange(
    agent: TelemetryAgent,
    state: Arc<RequestState>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = Utc::now();
    let timer = Instant::now();

    let _log_guard = agent.log_registry().register(&state);

    let (mut parts, body) = request.with_limited_body().into_parts();
    let head = RequestHead {
        method: parts.method.clone(),
        uri: parts.uri.clone(),
        headers: parts.headers.clone(),
        remote_addr: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
    };
    if let Some(principal) = parts.extensions.get::<Principal>() {
        state.set_principal(principal.clone());
    }

    let (request_body, body) = match buffer(body, "Request").await {
        Buffered::Complete(bytes) => {
            let content_type = head
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let extracted = extract_request_body(content_type, &bytes).await;
            (extracted, Body::from(bytes))
        }
        interrupted => (None, interrupted.into_body()),
    };

    parts.extensions.insert(state.clone());
    let response = next.run(Request::from_parts(parts, body)).await;

    let (parts, body) = response.into_parts();
    let response_head = ResponseHead {
        status: parts.status,
        headers: parts.headers.clone(),
    };
    let response = if is_event_stream(&parts.headers) {
        // streamed responses are passed through untouched
        Response::from_parts(parts, body)
    } else {
        match buffer(body, "Response").await {
            Buffered::Complete(bytes) => {
                state.set_response_body(capture_response_body(
                    &bytes,
                    agent.config().capture.max_response_body_mb,
                ));
                Response::from_parts(parts, Body::from(bytes))
            }
            interrupted => Response::from_parts(parts, interrupted.into_body()),
        }
    };

    let snapshot = agent.snapshot_capture().capture(
        RequestContext {
            request: &head,
            request_body,
            response: &response_head,
            state: &state,
        },
        timer.elapsed().as_secs_f64() * 1000.0,
        started_at,
        Utc::now(),
    );
    agent.enqueue(snapshot).await;

    response
}

enum Buffered {
    Complete(Bytes),
    Interrupted { partial: Bytes, error: axum::Error },
}

impl Buffered {
    /// Body yielding exactly what the original produced, including its error
    fn into_body(self) -> Body {
        match self {
            Buffered::Complete(bytes) => Body::from(bytes),
            Buffered::Interrupted { partial, error } => {
                let mut chunks = Vec::with_capacity(2);
                if !partial.is_empty() {
                    chunks.push(Ok(partial));
                }
                chunks.push(Err(error));
                Body::from_stream(futures::stream::iter(chunks))
            }
        }
    }
}

async fn buffer(body: Body, what: &'static str) -> Buffered {
    let mut stream = body.into_data_stream();
    let mut collected = Vec::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(data) => collected.extend_from_slice(&data),
            Err(error) => {
                tracing::warn!(error = %error, "{} body could not be buffered, not capturing it", what);
                return Buffered::Interrupted {
                    partial: Bytes::from(collected),
                    error,
                };
            }
        }
    }

    Buffered::Complete(Bytes::from(collected))
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("text/event-stream"))
}
