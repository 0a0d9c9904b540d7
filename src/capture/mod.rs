//! Per-request snapshot capture
//!
//! [`middleware::telemetry_middleware`] wraps every request: it creates the
//! request state, buffers both bodies, runs the inner service and finally
//! builds the [`Snapshot`](crate::models::Snapshot) with [`SnapshotCapture`].

pub mod body;
pub mod identity;
pub mod memory;
pub mod middleware;
pub mod snapshot;
pub mod status;

pub use identity::Principal;
pub use middleware::telemetry_middleware;
pub use snapshot::{RequestContext, RequestHead, ResponseHead, SnapshotCapture};
pub use status::{resolve_status_code, STATUS_OVERRIDE_HEADER};
