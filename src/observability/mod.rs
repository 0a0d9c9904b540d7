//! Log capture for request snapshots
//!
//! The [`LogCaptureLayer`] is installed in the host's tracing subscriber and
//! routes events emitted while serving a request into that request's state.

pub mod layer;

pub use layer::{LogCaptureGuard, LogCaptureLayer, LogCaptureRegistry};
