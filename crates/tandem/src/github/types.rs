//! GitHub API data types.
//!
//! These mirror only the fields we need from the REST v3 responses, which
//! keeps deserialization resilient to API additions. They are validated
//! into [`crate::platform`] entities by the `convert` module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue as returned by `GET /repos/{owner}/{repo}/issues`.
///
/// API docs: https://docs.github.com/en/rest/issues/issues#list-repository-issues
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    /// Issue number within the repository.
    pub number: u64,
    /// Issue title.
    pub title: String,
    /// Browser URL of the issue.
    pub html_url: String,
    /// `"open"` or `"closed"`.
    pub state: String,
    /// Markdown body.
    #[serde(default)]
    pub body: Option<String>,
    /// Attached milestone.
    #[serde(default)]
    pub milestone: Option<GitHubMilestone>,
    /// Present only when the entry is actually a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
    /// Last update time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Milestone as returned by `GET /repos/{owner}/{repo}/milestones`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubMilestone {
    /// Milestone number within the repository.
    pub number: u64,
    /// Milestone title.
    pub title: String,
}

/// Body for `POST /repos/{owner}/{repo}/issues`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateIssueBody<'a> {
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
}

/// GitHub error body (`{"message": "...", "documentation_url": "..."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubErrorBody {
    pub message: String,
}
