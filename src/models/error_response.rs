use serde::{Deserialize, Serialize};

use super::LogLevel;

/// Error body returned by the collector on a non-success response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<IssueDetail>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDetail {
    pub log_level: LogLevel,
    pub key: String,
    pub value: String,
}

impl ErrorResponse {
    /// One-line rendering of the issues for log fields
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|issue| match &issue.title {
                Some(title) => format!("{}/{}: {}", issue.issue_type, issue.description_type, title),
                None => format!("{}/{}", issue.issue_type, issue.description_type),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
