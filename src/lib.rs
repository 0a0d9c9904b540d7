//! In-process HTTP telemetry agent
//!
//! Attach [`capture::telemetry_middleware`] to an axum router and every
//! exchange is snapshotted, redacted by the [`masking`] engine and delivered
//! to the collector by a background worker, off the request path. Database
//! calls made through the [`interceptor`] types are counted per request.

pub mod agent;
pub mod capture;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod interceptor;
pub mod masking;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod server;
pub mod signals;

pub use agent::TelemetryAgent;
pub use context::RequestState;
pub use observability::LogCaptureLayer;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging with the default pretty format
///
/// Note: only the first initialization in a process takes effect.
pub fn init_tracing() {
    init_tracing_with("pretty", "info", None);
}

/// Initialize tracing with an explicit format and, optionally, the layer
/// that copies log events into the per-request log slot
///
/// `RUST_LOG` overrides `default_level` when set.
pub fn init_tracing_with(format: &str, default_level: &str, capture: Option<LogCaptureLayer>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter).with(capture);

    let result = if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if let Err(e) = result {
        eprintln!("Warning: tracing already initialized: {}", e);
    }
}
