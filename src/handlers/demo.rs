//! Demo application routes
//!
//! A tiny catalogue service that exercises every capture path: bodies,
//! counted queries through both interceptor variants, cache hits,
//! notifications, captured errors and redirected error pages.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use crate::agent::TelemetryAgent;
use crate::context::RequestState;
use crate::error::AppError;
use crate::interceptor::{CommandEvent, ConnectionInfo, CountingConnection, QueryParameters};
use crate::models::LogLevel;

const SELECT_ITEM: &str = "SELECT id, name, price FROM items WHERE id = ?";
const LIST_ITEMS: &str = "SELECT id, name, price FROM items ORDER BY id";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

#[derive(Clone)]
pub struct DemoState {
    db: Arc<CountingConnection<SqlitePool>>,
    cache: Arc<DashMap<i64, Item>>,
    agent: TelemetryAgent,
}

impl DemoState {
    /// Open the catalogue database and seed it
    pub async fn connect(agent: TelemetryAgent, database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            // an in-memory database lives only as long as its connection
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                price REAL NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO items (id, name, price) VALUES
                (1, 'widget', 2.5), (2, 'gadget', 10.0), (3, 'gizmo', 7.25)",
        )
        .execute(&pool)
        .await?;

        let info = ConnectionInfo::parse(database_url).with_context_name("catalogue");
        Ok(Self {
            db: Arc::new(agent.count_connection(pool, info)),
            cache: Arc::new(DashMap::new()),
            agent,
        })
    }
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /echo - returns the request body unchanged
pub async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// GET /items/:id - decorated-connection query with a read-through cache
pub async fn get_item(
    State(demo): State<DemoState>,
    Extension(state): Extension<Arc<RequestState>>,
    Path(id): Path<i64>,
) -> Result<Json<Item>, AppError> {
    if let Some(item) = demo.cache.get(&id) {
        state.mark_cache_hit();
        return Ok(Json(item.clone()));
    }

    let params = QueryParameters::new().with("id", id);
    let item = demo
        .db
        .execute(&state, SELECT_ITEM, &params, |pool, sql| {
            sqlx::query_as::<_, Item>(sql).bind(id).fetch_optional(pool)
        })
        .await?;

    match item {
        Some(item) => {
            demo.cache.insert(id, item.clone());
            Ok(Json(item))
        }
        None => {
            state.notify(LogLevel::Warning, "item", format!("item {} not found", id));
            Err(AppError::NotFound(format!("item {}", id)))
        }
    }
}

/// GET /items - query reported through ORM command events
pub async fn list_items(
    State(demo): State<DemoState>,
    Extension(state): Extension<Arc<RequestState>>,
) -> Result<Json<Vec<Item>>, AppError> {
    let pending = CommandEvent::start(
        LIST_ITEMS,
        QueryParameters::new(),
        Arc::new(demo.db.connection_info().clone()),
    );
    let result = sqlx::query_as::<_, Item>(LIST_ITEMS)
        .fetch_all(demo.db.get_ref())
        .await;
    let items = demo
        .agent
        .command_events()
        .report(&state, &pending.finish(), result)?;

    tracing::info!(count = items.len(), "Listed items");
    Ok(Json(items))
}

/// GET /fail - records the error on the request before answering 500
pub async fn fail(Extension(state): Extension<Arc<RequestState>>) -> Result<Response, AppError> {
    let error = AppError::InternalError("simulated failure".to_string());
    tracing::error!(error = %error, "Request failed");
    state.capture_error(&error);
    Err(error)
}

/// GET /moved - legacy error page reached through a redirect
pub async fn moved() -> Redirect {
    Redirect::to("/error/404")
}

/// GET /teapot - status rewritten on the way out
pub async fn teapot() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(crate::capture::STATUS_OVERRIDE_HEADER, "418")],
        "short and stout",
    )
}
