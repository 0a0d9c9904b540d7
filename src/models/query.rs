use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single field group an interceptor may record for each query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CaptureOption {
    None,
    Query,
    Parameters,
    Context,
    ExceptionMessage,
}

/// Set of [`CaptureOption`]s controlling which `DbQueryEntry` fields are filled
///
/// An empty set, or any set containing `None`, disables entry capture entirely.
/// Deserializes from a list such as `["Query", "ExceptionMessage"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureOptions(BTreeSet<CaptureOption>);

impl CaptureOptions {
    pub fn new(options: impl IntoIterator<Item = CaptureOption>) -> Self {
        Self(options.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::new([CaptureOption::None])
    }

    pub fn all() -> Self {
        Self::new([
            CaptureOption::Query,
            CaptureOption::Parameters,
            CaptureOption::Context,
            CaptureOption::ExceptionMessage,
        ])
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_empty() || self.0.contains(&CaptureOption::None)
    }

    pub fn contains(&self, option: CaptureOption) -> bool {
        !self.is_disabled() && self.0.contains(&option)
    }
}

impl Default for CaptureOptions {
    /// Parameters are opt-in since they routinely carry user data
    fn default() -> Self {
        Self::new([
            CaptureOption::Query,
            CaptureOption::Context,
            CaptureOption::ExceptionMessage,
        ])
    }
}

/// One executed database query
///
/// `duration_ms`, `success` and `executed_at` are always set; every other field
/// is populated only when the matching [`CaptureOption`] is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbQueryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
    pub executed_at: DateTime<Utc>,
}
