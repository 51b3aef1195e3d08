//! Change pollers, one per source.
//!
//! Each poller fetches raw entities and tags the ones belonging to a
//! tracked sub-group with routing metadata. Untracked entities are dropped.

use chrono::{DateTime, Utc};

use super::hierarchy::GroupHierarchy;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::CycleFailure;
use crate::platform::{
    self, CompletedTask, Issue, IssueTracker, SyncDelta, TaskManager, short_error_message,
};

/// Issues gathered from every tracked repository.
#[derive(Debug, Default)]
pub struct IssuePoll {
    pub issues: Vec<Issue>,
    /// Repositories whose poll failed this cycle.
    pub failures: Vec<CycleFailure>,
}

impl IssuePoll {
    pub fn all_repos_polled(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetch issues updated since `since` for every sub-group.
///
/// A failing repository is recorded and skipped; it is picked up again on
/// the next cycle because the cursor only advances globally.
pub async fn poll_issues(
    tracker: &dyn IssueTracker,
    hierarchy: &GroupHierarchy,
    since: Option<DateTime<Utc>>,
    on_progress: Option<&ProgressCallback>,
) -> IssuePoll {
    let mut poll = IssuePoll::default();

    for sub_group in hierarchy.sub_groups.values() {
        emit(
            on_progress,
            SyncProgress::PollingRepo {
                repo: sub_group.full_name.clone(),
            },
        );

        match tracker
            .list_issues_updated_since(&sub_group.org_name, &sub_group.repo_name, since)
            .await
        {
            Ok(issues) => {
                tracing::debug!(repo = %sub_group.full_name, count = issues.len(), "Polled issues");
                let routing = sub_group.issue_routing();
                poll.issues.extend(
                    issues
                        .into_iter()
                        .filter(|issue| !issue.is_pull_request)
                        .map(|mut issue| {
                            issue.routing = Some(routing.clone());
                            issue
                        }),
                );
            }
            Err(e) => {
                let message = short_error_message(&e);
                tracing::warn!(repo = %sub_group.full_name, error = %message, "Failed to poll repository");
                emit(
                    on_progress,
                    SyncProgress::RepoPollFailed {
                        repo: sub_group.full_name.clone(),
                        error: message.clone(),
                    },
                );
                poll.failures.push(CycleFailure {
                    operation: format!("poll_issues:{}", sub_group.full_name),
                    message,
                    code: e.status_code(),
                });
            }
        }
    }

    poll
}

/// Fetch the task delta since `token`, keeping live tasks in tracked groups.
pub async fn poll_tasks(
    tasks: &dyn TaskManager,
    hierarchy: &GroupHierarchy,
    token: &str,
    on_progress: Option<&ProgressCallback>,
) -> platform::Result<SyncDelta> {
    let mut delta = tasks.sync_delta(token).await?;

    delta.items.retain(|task| !task.is_deleted);
    delta.items = delta
        .items
        .into_iter()
        .filter_map(|mut task| {
            task.routing = Some(hierarchy.task_routing(&task.project_id)?);
            Some(task)
        })
        .collect();

    emit(
        on_progress,
        SyncProgress::TasksPolled {
            count: delta.items.len(),
            full_sync: delta.full_sync,
        },
    );
    Ok(delta)
}

/// Fetch tasks completed since `since`, oldest first.
pub async fn poll_completed(
    tasks: &dyn TaskManager,
    hierarchy: &GroupHierarchy,
    since: Option<DateTime<Utc>>,
    on_progress: Option<&ProgressCallback>,
) -> platform::Result<Vec<CompletedTask>> {
    let mut completed: Vec<CompletedTask> = tasks
        .completed_since(since)
        .await?
        .into_iter()
        .filter_map(|mut item| {
            item.routing = Some(hierarchy.task_routing(&item.project_id)?);
            Some(item)
        })
        .collect();
    completed.sort_by_key(|item| item.completed_at);

    emit(
        on_progress,
        SyncProgress::CompletedPolled {
            count: completed.len(),
        },
    );
    Ok(completed)
}
