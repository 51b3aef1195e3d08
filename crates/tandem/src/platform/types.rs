use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::Result;

/// Identifier of a task-manager project ("group").
pub type GroupId = String;

/// Open/closed state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

/// A milestone on the issue-tracker side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestone {
    pub number: u64,
    pub title: String,
}

/// Which repository group an issue was observed in.
///
/// Assigned by the pollers; not part of the issue tracker's own data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRouting {
    pub group_id: Option<GroupId>,
    pub org_name: String,
    pub repo_name: String,
    pub full_repo_name: String,
}

/// An issue from the issue tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    /// Browser URL; this is the identity embedded in linked tasks.
    pub url: String,
    pub state: IssueState,
    pub body: Option<String>,
    pub milestone: Option<Milestone>,
    pub is_pull_request: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub routing: Option<IssueRouting>,
}

impl Issue {
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }

    /// Title of the milestone, if one is set.
    #[must_use]
    pub fn milestone_title(&self) -> Option<&str> {
        self.milestone.as_ref().map(|m| m.title.as_str())
    }
}

/// Repository a task belongs to, derived from its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRouting {
    pub org_name: String,
    pub repo_name: String,
    pub full_repo_name: String,
}

/// A task from the task manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub description: String,
    pub project_id: GroupId,
    pub section_id: Option<String>,
    pub completed: bool,
    pub is_deleted: bool,
    pub routing: Option<TaskRouting>,
}

/// An entry from the completed-task feed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTask {
    pub task_id: String,
    pub content: String,
    /// Only present when the feed returns the full item inline.
    pub description: Option<String>,
    pub project_id: GroupId,
    pub section_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub routing: Option<TaskRouting>,
}

/// A task-manager project; parents represent organizations and their
/// children represent repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: GroupId,
    pub name: String,
    pub parent_id: Option<GroupId>,
}

/// A section inside a task-manager project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: String,
    pub project_id: GroupId,
    pub name: String,
}

/// Result of an incremental task sync.
#[derive(Debug, Clone, Default)]
pub struct SyncDelta {
    pub items: Vec<Task>,
    pub sync_token: String,
    pub full_sync: bool,
}

/// Fields for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub content: String,
    pub description: String,
    pub project_id: GroupId,
    pub section_id: Option<String>,
}

/// Partial task update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub content: Option<String>,
    pub description: Option<String>,
}

/// Fields for creating a section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NewSection {
    pub project_id: GroupId,
    pub name: String,
}

/// Fields for creating an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: Option<String>,
    pub milestone: Option<u64>,
}

/// Outcome of one command in a bulk call, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// The created entity id, or the remote error message.
    pub result: std::result::Result<String, String>,
}

impl BatchOutcome {
    #[must_use]
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            result: Ok(id.into()),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
        }
    }
}

/// Whether `text` contains `needle` not followed by an alphanumeric, so a
/// link to issue 1 does not match a link to issue 12.
#[must_use]
pub fn mentions(text: &str, needle: &str) -> bool {
    !needle.is_empty()
        && text.match_indices(needle).any(|(start, _)| {
            text[start + needle.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_ascii_alphanumeric())
        })
}

/// The issue-tracker side of the sync.
///
/// Implementors apply their own rate limiting and retries and convert
/// remote failures to [`ApiError`](super::ApiError).
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// All issues (not pull requests) updated since `since`; `None` scans
    /// everything. Pagination is handled internally.
    async fn list_issues_updated_since(
        &self,
        org: &str,
        repo: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Issue>>;

    /// All open issues (not pull requests).
    async fn list_open_issues(&self, org: &str, repo: &str) -> Result<Vec<Issue>>;

    /// Fetch one issue; `Ok(None)` if it does not exist.
    async fn get_issue(&self, org: &str, repo: &str, number: u64) -> Result<Option<Issue>>;

    async fn create_issue(&self, org: &str, repo: &str, issue: &NewIssue) -> Result<Issue>;

    async fn set_issue_state(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        state: IssueState,
    ) -> Result<()>;

    /// Set or clear (`None`) an issue's milestone.
    async fn set_issue_milestone(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        milestone: Option<u64>,
    ) -> Result<()>;

    async fn list_milestones(&self, org: &str, repo: &str) -> Result<Vec<Milestone>>;
}

/// The task-manager side of the sync.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Changes since `token` (`"*"` for a full snapshot).
    async fn sync_delta(&self, token: &str) -> Result<SyncDelta>;

    /// Completed tasks since `since` (`None` for the feed's default window).
    async fn completed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<CompletedTask>>;

    /// Point-fetch a task (active or completed); `Ok(None)` if it does not exist.
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// First active task in `project_id` whose description [`mentions`] `needle`.
    async fn find_task_by_description(
        &self,
        project_id: &str,
        needle: &str,
    ) -> Result<Option<Task>>;

    /// Every active task, in one bulk call.
    async fn list_active_tasks(&self) -> Result<Vec<Task>>;

    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    async fn update_task(&self, task_id: &str, update: &TaskUpdate) -> Result<()>;

    /// Move a task to a section, or to the project root when `section_id` is `None`.
    async fn move_task(
        &self,
        task_id: &str,
        project_id: &str,
        section_id: Option<&str>,
    ) -> Result<()>;

    async fn close_task(&self, task_id: &str) -> Result<()>;

    async fn reopen_task(&self, task_id: &str) -> Result<()>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn list_sections(&self, project_id: &str) -> Result<Vec<Section>>;

    async fn create_section(&self, project_id: &str, name: &str) -> Result<Section>;

    /// Create many sections in one call. Outcomes are returned in input order.
    async fn batch_create_sections(&self, sections: &[NewSection]) -> Result<Vec<BatchOutcome>>;

    /// Create many tasks in one call. Outcomes are returned in input order.
    async fn batch_create_tasks(&self, tasks: &[NewTask]) -> Result<Vec<BatchOutcome>>;
}
