//! Per-entity reconciliation in both directions.
//!
//! Every entry point returns a [`ReconcileOutcome`]; API failures become the
//! `Error` variant. Decisions depend only on the current state of both
//! systems, so reprocessing an entity that is already in sync is a no-op.

use super::cache::SectionMilestoneCache;
use super::identity::{
    IssueLink, LinkParseError, LinkScope, canonical_title, find_issue_link, parse_issue_url,
    parse_title_prefix,
};
use super::mapping::LinkStore;
use super::types::{ReconcileOutcome, SkipReason, SyncOptions};
use crate::platform::{
    self, ApiError, Issue, IssueState, IssueTracker, NewIssue, NewTask, Task, TaskManager,
    TaskUpdate, mentions, short_error_message,
};

fn skipped(reason: SkipReason) -> ReconcileOutcome {
    ReconcileOutcome::Skipped { reason }
}

fn error_outcome(e: ApiError) -> ReconcileOutcome {
    ReconcileOutcome::Error {
        message: short_error_message(&e),
    }
}

/// Where an issue's task should live.
enum SectionTarget {
    /// Project root (no milestone).
    Root,
    Section { id: String, name: String },
    /// The section could not be resolved; leave placement alone.
    Unknown,
}

/// Applies reconciliation decisions for one cycle.
pub struct Reconciler<'a> {
    issues: &'a dyn IssueTracker,
    tasks: &'a dyn TaskManager,
    links: &'a LinkStore,
    cache: &'a mut SectionMilestoneCache,
    options: &'a SyncOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        issues: &'a dyn IssueTracker,
        tasks: &'a dyn TaskManager,
        links: &'a LinkStore,
        cache: &'a mut SectionMilestoneCache,
        options: &'a SyncOptions,
    ) -> Self {
        Self {
            issues,
            tasks,
            links,
            cache,
            options,
        }
    }

    fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    // ---------- Issue → task ----------

    /// Project one observed issue onto its task.
    pub async fn reconcile_issue(&mut self, issue: &Issue) -> ReconcileOutcome {
        let Some(group_id) = issue
            .routing
            .as_ref()
            .and_then(|routing| routing.group_id.clone())
        else {
            return skipped(SkipReason::NoProjectId);
        };

        self.issue_to_task(issue, &group_id)
            .await
            .unwrap_or_else(error_outcome)
    }

    async fn issue_to_task(
        &mut self,
        issue: &Issue,
        group_id: &str,
    ) -> platform::Result<ReconcileOutcome> {
        let Some(task) = self.find_linked_task(issue, group_id).await? else {
            if !issue.is_open() {
                return Ok(ReconcileOutcome::Unchanged);
            }
            return self.create_task_for_issue(issue, group_id).await;
        };

        match (issue.is_open(), task.completed) {
            (false, false) => {
                if !self.dry_run() {
                    self.tasks.close_task(&task.id).await?;
                }
                return Ok(ReconcileOutcome::Completed);
            }
            (true, true) => {
                if !self.dry_run() {
                    self.tasks.reopen_task(&task.id).await?;
                }
                return Ok(ReconcileOutcome::Reopened);
            }
            (false, true) => return Ok(ReconcileOutcome::Unchanged),
            (true, false) => {}
        }

        let canonical = canonical_title(issue.number, &issue.title);
        let retitled = task.content != canonical;
        if retitled && !self.dry_run() {
            let update = TaskUpdate {
                content: Some(canonical),
                description: None,
            };
            self.tasks.update_task(&task.id, &update).await?;
        }

        let (section_id, section) = match self.section_target(issue, group_id).await {
            SectionTarget::Root => (None, None),
            SectionTarget::Section { id, name } => (Some(id), Some(name)),
            SectionTarget::Unknown => {
                return Ok(if retitled {
                    ReconcileOutcome::Updated
                } else {
                    ReconcileOutcome::Unchanged
                });
            }
        };

        if section_id != task.section_id {
            if !self.dry_run() {
                self.tasks
                    .move_task(&task.id, group_id, section_id.as_deref())
                    .await?;
            }
            return Ok(ReconcileOutcome::SectionUpdated { section });
        }

        Ok(if retitled {
            ReconcileOutcome::Updated
        } else {
            ReconcileOutcome::Unchanged
        })
    }

    /// Find the task linked to `issue`: the reverse link first (it also
    /// finds completed tasks), then a description search.
    async fn find_linked_task(
        &self,
        issue: &Issue,
        group_id: &str,
    ) -> platform::Result<Option<Task>> {
        if let Some(task_id) = self.links.task_for_issue(&issue.url).await {
            match self.tasks.get_task(&task_id).await? {
                Some(task) if !task.is_deleted && mentions(&task.description, &issue.url) => {
                    return Ok(Some(task));
                }
                _ => {
                    tracing::debug!(task_id = %task_id, issue_url = %issue.url, "Dropping stale reverse link");
                    if !self.dry_run() {
                        self.links.forget_issue(&issue.url).await;
                    }
                }
            }
        }

        self.tasks
            .find_task_by_description(group_id, &issue.url)
            .await
    }

    async fn section_target(&mut self, issue: &Issue, group_id: &str) -> SectionTarget {
        let Some(name) = issue.milestone_title() else {
            return SectionTarget::Root;
        };

        let resolved = if self.dry_run() {
            self.cache.find_section(self.tasks, group_id, name).await
        } else {
            self.cache
                .get_or_create_section(self.tasks, group_id, name)
                .await
                .map(Some)
        };

        match resolved {
            Ok(Some(id)) => SectionTarget::Section {
                id,
                name: name.to_string(),
            },
            Ok(None) => SectionTarget::Unknown,
            Err(e) => {
                tracing::warn!(
                    issue_url = %issue.url,
                    section = name,
                    error = %short_error_message(&e),
                    "Failed to resolve section for milestone"
                );
                SectionTarget::Unknown
            }
        }
    }

    async fn create_task_for_issue(
        &mut self,
        issue: &Issue,
        group_id: &str,
    ) -> platform::Result<ReconcileOutcome> {
        let (section_id, section) = match self.section_target(issue, group_id).await {
            SectionTarget::Section { id, name } => (Some(id), Some(name)),
            SectionTarget::Root | SectionTarget::Unknown => (None, None),
        };

        if self.dry_run() {
            return Ok(ReconcileOutcome::Created {
                section: issue.milestone_title().map(str::to_string),
            });
        }

        let task = self
            .tasks
            .create_task(&NewTask {
                content: canonical_title(issue.number, &issue.title),
                description: issue.url.clone(),
                project_id: group_id.to_string(),
                section_id,
            })
            .await?;
        self.links.link(&task.id, &issue.url).await;
        tracing::debug!(task_id = %task.id, issue_url = %issue.url, "Created task for issue");

        Ok(ReconcileOutcome::Created { section })
    }

    // ---------- Task → issue ----------

    /// Project one changed task onto its issue.
    pub async fn reconcile_task(&mut self, task: &Task) -> ReconcileOutcome {
        let link = match find_issue_link(&task.description, &self.link_scope(task)) {
            Ok(link) => Some(link),
            Err(LinkParseError::Malformed(fragment)) => {
                tracing::warn!(task_id = %task.id, fragment = %fragment, "Task links to a malformed issue URL");
                return skipped(SkipReason::MalformedLink);
            }
            Err(LinkParseError::Absent) => self.recover_link(task).await,
        };

        let result = match link {
            Some(link) => self.sync_linked_task(task, &link).await,
            None => self.create_issue_for_task(task).await,
        };
        result.unwrap_or_else(error_outcome)
    }

    /// A task without a link in its description may still be linked: the
    /// durable mapping or its `[#N]` title prefix can name the issue.
    async fn recover_link(&self, task: &Task) -> Option<IssueLink> {
        if let Some(url) = self.links.issue_url_for_task(&task.id).await
            && let Ok(link) = parse_issue_url(&url)
            && self.link_scope(task).contains(&link)
        {
            return Some(link);
        }

        let (number, _) = parse_title_prefix(&task.content).ok()?;
        let routing = task.routing.as_ref()?;
        IssueLink::from_parts(&self.options.issue_web_url, &routing.full_repo_name, number).ok()
    }

    fn link_scope<'t>(&'t self, task: &'t Task) -> LinkScope<'t> {
        LinkScope::new(
            &self.options.issue_web_url,
            task.routing.as_ref().map(|r| r.full_repo_name.as_str()),
        )
    }

    async fn sync_linked_task(
        &mut self,
        task: &Task,
        link: &IssueLink,
    ) -> platform::Result<ReconcileOutcome> {
        let Some(issue) = self
            .issues
            .get_issue(&link.org, &link.repo, link.number)
            .await?
        else {
            tracing::debug!(task_id = %task.id, issue_url = %link.url, "Linked issue not found");
            return Ok(skipped(SkipReason::IssueNotFound));
        };

        match (task.completed, issue.is_open()) {
            (true, true) => {
                if !self.dry_run() {
                    self.issues
                        .set_issue_state(&link.org, &link.repo, link.number, IssueState::Closed)
                        .await?;
                    self.links.forget_task(&task.id).await;
                }
                return Ok(ReconcileOutcome::Completed);
            }
            (false, false) => {
                if !self.dry_run() {
                    self.issues
                        .set_issue_state(&link.org, &link.repo, link.number, IssueState::Open)
                        .await?;
                }
                return Ok(ReconcileOutcome::Reopened);
            }
            (true, false) => return Ok(ReconcileOutcome::Unchanged),
            (false, true) => {}
        }

        let repaired = self.repair_link_text(task, &issue).await?;
        if let Some(outcome) = self.sync_milestone(task, &issue, link).await? {
            return Ok(outcome);
        }

        Ok(if repaired {
            ReconcileOutcome::Updated
        } else {
            ReconcileOutcome::Unchanged
        })
    }

    /// Restore the URL and title prefix on a task recovered without them.
    async fn repair_link_text(&self, task: &Task, issue: &Issue) -> platform::Result<bool> {
        if mentions(&task.description, &issue.url) {
            return Ok(false);
        }

        let content = match parse_title_prefix(&task.content) {
            Ok((number, _)) if number == issue.number => None,
            _ => Some(canonical_title(issue.number, &issue.title)),
        };
        if !self.dry_run() {
            let update = TaskUpdate {
                content,
                description: Some(issue.url.clone()),
            };
            self.tasks.update_task(&task.id, &update).await?;
            self.links.link(&task.id, &issue.url).await;
        }
        Ok(true)
    }

    /// Carry the task's section onto the issue's milestone.
    ///
    /// A task with no section clears the milestone. A section whose name has
    /// no matching milestone leaves the issue alone.
    async fn sync_milestone(
        &mut self,
        task: &Task,
        issue: &Issue,
        link: &IssueLink,
    ) -> platform::Result<Option<ReconcileOutcome>> {
        let Some(section_id) = task.section_id.as_deref() else {
            if issue.milestone.is_none() {
                return Ok(None);
            }
            if !self.dry_run() {
                self.issues
                    .set_issue_milestone(&link.org, &link.repo, link.number, None)
                    .await?;
            }
            return Ok(Some(ReconcileOutcome::SectionUpdated { section: None }));
        };

        let name = match self
            .cache
            .resolve_section_name(self.tasks, &task.project_id, section_id)
            .await
        {
            Ok(Some(name)) => name,
            Ok(None) => {
                tracing::warn!(task_id = %task.id, section_id, "Task is in an unknown section");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %short_error_message(&e), "Failed to resolve section name");
                return Ok(None);
            }
        };

        if issue.milestone_title() == Some(name.as_str()) {
            return Ok(None);
        }

        let Some(number) = self
            .cache
            .milestone_number(self.issues, &link.org, &link.repo, &name)
            .await?
        else {
            tracing::warn!(
                repo = %link.full_repo_name(),
                milestone = %name,
                "No milestone matches section; leaving issue unchanged"
            );
            return Ok(None);
        };

        if !self.dry_run() {
            self.issues
                .set_issue_milestone(&link.org, &link.repo, link.number, Some(number))
                .await?;
        }
        Ok(Some(ReconcileOutcome::SectionUpdated {
            section: Some(name),
        }))
    }

    async fn create_issue_for_task(&mut self, task: &Task) -> platform::Result<ReconcileOutcome> {
        let Some(routing) = task.routing.clone() else {
            return Ok(skipped(SkipReason::NoRouting));
        };
        if task.completed {
            return Ok(skipped(SkipReason::AlreadyCompleted));
        }

        let section_name = match task.section_id.as_deref() {
            Some(section_id) => self
                .cache
                .resolve_section_name(self.tasks, &task.project_id, section_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(task_id = %task.id, error = %short_error_message(&e), "Failed to resolve section name");
                    None
                }),
            None => None,
        };
        let milestone = match section_name.as_deref() {
            Some(name) => self
                .cache
                .milestone_number(self.issues, &routing.org_name, &routing.repo_name, name)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(repo = %routing.full_repo_name, error = %short_error_message(&e), "Failed to load milestones");
                    None
                }),
            None => None,
        };
        let section = section_name.filter(|_| milestone.is_some());

        if self.dry_run() {
            return Ok(ReconcileOutcome::Created { section });
        }

        let new_issue = NewIssue {
            title: task.content.clone(),
            body: (!task.description.is_empty()).then(|| task.description.clone()),
            milestone,
        };
        let issue = self
            .issues
            .create_issue(&routing.org_name, &routing.repo_name, &new_issue)
            .await?;

        // Written before the task is rewritten so a failed update is
        // repaired next cycle instead of creating a second issue.
        self.links.link_task(&task.id, &issue.url).await;

        let update = TaskUpdate {
            content: Some(canonical_title(issue.number, &issue.title)),
            description: Some(issue.url.clone()),
        };
        self.tasks.update_task(&task.id, &update).await?;
        self.links.link(&task.id, &issue.url).await;
        tracing::debug!(task_id = %task.id, issue_url = %issue.url, "Created issue for task");

        Ok(ReconcileOutcome::Created { section })
    }

    // ---------- Completions ----------

    /// Close the issue behind a completed task.
    pub async fn reconcile_completion(&self, task_id: &str, link: &IssueLink) -> ReconcileOutcome {
        let issue = match self.issues.get_issue(&link.org, &link.repo, link.number).await {
            Ok(Some(issue)) => issue,
            Ok(None) => return skipped(SkipReason::IssueNotFound),
            Err(e) => return error_outcome(e),
        };
        if !issue.is_open() {
            return ReconcileOutcome::Unchanged;
        }
        if !self.dry_run() {
            if let Err(e) = self
                .issues
                .set_issue_state(&link.org, &link.repo, link.number, IssueState::Closed)
                .await
            {
                return error_outcome(e);
            }
            self.links.forget_task(task_id).await;
        }
        ReconcileOutcome::Completed
    }
}
