//! Data carried through the capture → redact → deliver pipeline

pub mod error_response;
pub mod notification;
pub mod outbound;
pub mod payload;
pub mod query;
pub mod snapshot;

pub use error_response::{ErrorResponse, Issue, IssueDetail};
pub use notification::{ExceptionInfo, LogEntry, LogLevel, Notification};
pub use outbound::{Dependency, HttpRequestLogContext};
pub use payload::{
    AttentionLevel, DiagnosticsPayload, ErrorCategory, LogContextRequest, RequestPayload,
    ResponsePayload, UserPayload,
};
pub use query::{CaptureOption, CaptureOptions, DbQueryEntry};
pub use snapshot::{
    Diagnostics, RequestBody, RequestSnapshot, ResponseSnapshot, Snapshot, UserSnapshot,
};
