use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;

use super::{identity, memory, status};
use crate::config::CaptureConfig;
use crate::context::RequestState;
use crate::models::{
    Dependency, Diagnostics, RequestBody, RequestSnapshot, ResponseSnapshot, Snapshot,
};

const FALLBACK_IP: &str = "127.0.0.1";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Request line and headers kept aside before the request is handed on
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Everything the snapshot is assembled from
pub struct RequestContext<'a> {
    pub request: &'a RequestHead,
    pub request_body: Option<RequestBody>,
    pub response: &'a ResponseHead,
    pub state: &'a RequestState,
}

#[derive(Debug, Clone)]
pub struct SnapshotCapture {
    capture_cookies: bool,
}

impl SnapshotCapture {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            capture_cookies: config.capture_cookies,
        }
    }

    /// Build the request's snapshot; called once, after the response body is captured
    pub fn capture(
        &self,
        context: RequestContext<'_>,
        elapsed_ms: f64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Snapshot {
        let RequestContext {
            request,
            request_body,
            response,
            state,
        } = context;

        let principal = state.principal();
        let http_requests = state.take_http_requests();
        let dependencies = http_requests.iter().map(Dependency::from).collect();
        let response_body = state.take_response_body().unwrap_or_default();

        Snapshot {
            correlation_id: state.request_id().to_string(),
            started_at,
            ended_at,
            elapsed_ms,
            request: RequestSnapshot {
                method: request.method.to_string(),
                scheme: request.uri.scheme_str().map(str::to_string),
                host: request
                    .uri
                    .host()
                    .map(str::to_string)
                    .or_else(|| header_value(&request.headers, header::HOST.as_str())),
                path: request.uri.path().to_string(),
                query_string: request.uri.query().map(str::to_string),
                headers: flatten_headers(&request.headers, &[header::COOKIE]),
                body: request_body,
                cookies: if self.capture_cookies {
                    parse_cookies(&request.headers)
                } else {
                    HashMap::new()
                },
                ip_address: client_ip(request),
                user_agent: header_value(&request.headers, header::USER_AGENT.as_str()),
                content_type: header_value(&request.headers, header::CONTENT_TYPE.as_str()),
            },
            response: ResponseSnapshot {
                status_code: response.status.as_u16(),
                resolved_status_code: status::resolve_status_code(
                    response.status.as_u16(),
                    &response.headers,
                ),
                headers: flatten_headers(&response.headers, &[]),
                body: response_body.content,
                size: response_body.size,
                content_type: header_value(&response.headers, header::CONTENT_TYPE.as_str()),
            },
            user: identity::resolve_user(principal.as_ref(), &request.headers),
            diagnostics: Diagnostics {
                memory_bytes: memory::resident_memory_bytes(),
                db_query_count: state.query_count(),
                served_from_cache: state.served_from_cache(),
                dependencies,
            },
            log_entries: state.take_log_entries(),
            notifications: state.take_notifications(),
            exception: state.take_exception(),
            db_queries: state.take_query_log(),
            http_requests,
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Lower-cased header names, repeated headers joined with ", "
fn flatten_headers(headers: &HeaderMap, skip: &[header::HeaderName]) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        if skip.contains(name) {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn client_ip(request: &RequestHead) -> String {
    request
        .headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| request.remote_addr.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| FALLBACK_IP.to_string())
}
