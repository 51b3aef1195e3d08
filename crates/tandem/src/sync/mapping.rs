//! Durable task ↔ issue links and the layered resolver for completed tasks.
//!
//! Links are written both ways when a counterpart is created:
//! `task:<id>` → issue URL and `issue:<url>` → task id. Store failures are
//! logged and treated as a miss; the links only speed up lookups that the
//! task text can also answer.

use std::sync::Arc;

use super::identity::{
    IssueLink, LinkParseError, LinkScope, find_issue_link, parse_issue_url, parse_title_prefix,
};
use crate::platform::{CompletedTask, TaskManager, short_error_message};
use crate::store::{KvStore, MAPPING_TTL, issue_key, task_key};

/// Reads and writes the durable link entries.
#[derive(Clone)]
pub struct LinkStore {
    store: Arc<dyn KvStore>,
}

impl LinkStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %short_error_message(&e), "Failed to read link");
                None
            }
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key, error = %short_error_message(&e), "Failed to delete link");
        }
    }

    pub async fn issue_url_for_task(&self, task_id: &str) -> Option<String> {
        self.read(&task_key(task_id)).await
    }

    pub async fn task_for_issue(&self, issue_url: &str) -> Option<String> {
        self.read(&issue_key(issue_url)).await
    }

    /// Record only the `task:` direction.
    pub async fn link_task(&self, task_id: &str, issue_url: &str) {
        if let Err(e) = self
            .store
            .put(&task_key(task_id), issue_url, Some(MAPPING_TTL))
            .await
        {
            tracing::warn!(task_id, error = %short_error_message(&e), "Failed to write task link");
        }
    }

    /// Record both directions.
    pub async fn link(&self, task_id: &str, issue_url: &str) {
        self.link_task(task_id, issue_url).await;
        if let Err(e) = self
            .store
            .put(&issue_key(issue_url), task_id, Some(MAPPING_TTL))
            .await
        {
            tracing::warn!(issue_url, error = %short_error_message(&e), "Failed to write issue link");
        }
    }

    pub async fn forget_task(&self, task_id: &str) {
        self.remove(&task_key(task_id)).await;
    }

    pub async fn forget_issue(&self, issue_url: &str) {
        self.remove(&issue_key(issue_url)).await;
    }
}

/// Which layer produced a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Mapping,
    Description,
    TitlePrefix,
    PointFetch,
}

/// What the resolver found for one completed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Linked(IssueLink, ResolvedVia),
    /// The task was fetched and carries neither a link nor an `[#N]`
    /// prefix: it was completed before it was ever synced.
    Unlinked,
    /// Every layer came up empty or failed.
    Unresolved,
}

/// Finds the issue a completed task is linked to.
pub struct MappingResolver<'a> {
    links: &'a LinkStore,
    tasks: &'a dyn TaskManager,
    issue_web_url: &'a str,
    dry_run: bool,
}

impl<'a> MappingResolver<'a> {
    pub fn new(
        links: &'a LinkStore,
        tasks: &'a dyn TaskManager,
        issue_web_url: &'a str,
        dry_run: bool,
    ) -> Self {
        Self {
            links,
            tasks,
            issue_web_url,
            dry_run,
        }
    }

    /// Try each layer in order and stop at the first hit.
    ///
    /// Only links into the task's own repository count. `Unresolved` means
    /// the caller must not advance past this task.
    pub async fn resolve(&self, completed: &CompletedTask) -> Resolution {
        let task_id = completed.task_id.as_str();
        let routing = completed.routing.as_ref();
        let scope = LinkScope::new(self.issue_web_url, routing.map(|r| r.full_repo_name.as_str()));

        if let Some(url) = self.links.issue_url_for_task(task_id).await {
            match parse_issue_url(&url) {
                Ok(link) if scope.contains(&link) => return Resolution::Linked(link, ResolvedVia::Mapping),
                Ok(link) => tracing::warn!(task_id, issue_url = %link.url, "Stored link points outside the task's repository"),
                Err(e) => tracing::warn!(task_id, error = %e, "Stored link does not parse"),
            }
        }

        if let Some(description) = completed.description.as_deref()
            && let Ok(link) = find_issue_link(description, &scope)
        {
            return Resolution::Linked(link, ResolvedVia::Description);
        }

        let prefix = parse_title_prefix(&completed.content);
        if let Ok((number, _)) = prefix
            && let Some(routing) = routing
        {
            match IssueLink::from_parts(self.issue_web_url, &routing.full_repo_name, number) {
                Ok(link) => return Resolution::Linked(link, ResolvedVia::TitlePrefix),
                Err(e) => tracing::debug!(task_id, error = %e, "Could not rebuild link from title"),
            }
        }

        match self.tasks.get_task(task_id).await {
            Ok(Some(task)) => match find_issue_link(&task.description, &scope) {
                Ok(link) => {
                    if !self.dry_run {
                        self.links.link_task(task_id, &link.url).await;
                    }
                    return Resolution::Linked(link, ResolvedVia::PointFetch);
                }
                Err(LinkParseError::Absent) if prefix == Err(LinkParseError::Absent) => {
                    tracing::debug!(task_id, "Completed task was never linked");
                    return Resolution::Unlinked;
                }
                Err(LinkParseError::Absent) => {}
                Err(e) => tracing::debug!(task_id, error = %e, "Fetched task has a bad link"),
            },
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(task_id, error = %short_error_message(&e), "Point fetch failed");
            }
        }

        tracing::warn!(
            task_id,
            content = %completed.content,
            project_id = %completed.project_id,
            has_description = completed.description.is_some(),
            has_routing = routing.is_some(),
            "Could not resolve issue link for completed task"
        );
        Resolution::Unresolved
    }
}
