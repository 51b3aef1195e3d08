//! Bulk catch-up for repository groups that have never been synced.
//!
//! One pass queues open issues that have no linked task, bounded by
//! [`SyncOptions::max_tasks_per_sync`], creates the sections they need in one
//! bulk call, then creates the tasks in chunks. Groups that could not be
//! finished are reported so the next cycle resumes them.

use std::collections::{BTreeSet, HashSet};

use super::cache::SectionMilestoneCache;
use super::hierarchy::GroupHierarchy;
use super::identity::{LinkScope, canonical_title, find_issue_link};
use super::mapping::LinkStore;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::SyncOptions;
use crate::platform::{
    GroupId, Issue, IssueTracker, NewSection, NewTask, Section, TaskManager, short_error_message,
};

/// Summary of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Groups this pass was asked to fill.
    pub group_ids: Vec<GroupId>,
    pub queued: usize,
    pub created: usize,
    pub failed: usize,
    pub sections_created: usize,
    /// Open issues skipped because a linked task already exists.
    pub already_linked: usize,
    /// Tasks held back because their section could not be created this pass.
    pub deferred: usize,
    pub completed_group_ids: Vec<GroupId>,
    pub incomplete_group_ids: Vec<GroupId>,
    pub errors: Vec<String>,
}

impl BackfillReport {
    pub fn is_complete(&self) -> bool {
        self.incomplete_group_ids.is_empty()
    }
}

/// An issue waiting to become a task.
struct QueuedTask {
    group_id: GroupId,
    issue: Issue,
}

impl QueuedTask {
    fn section_name(&self) -> Option<&str> {
        self.issue.milestone_title()
    }
}

pub struct Backfill<'a> {
    issues: &'a dyn IssueTracker,
    tasks: &'a dyn TaskManager,
    links: &'a LinkStore,
    hierarchy: &'a GroupHierarchy,
    cache: &'a mut SectionMilestoneCache,
    options: &'a SyncOptions,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a> Backfill<'a> {
    pub fn new(
        issues: &'a dyn IssueTracker,
        tasks: &'a dyn TaskManager,
        links: &'a LinkStore,
        hierarchy: &'a GroupHierarchy,
        cache: &'a mut SectionMilestoneCache,
        options: &'a SyncOptions,
        on_progress: Option<&'a ProgressCallback>,
    ) -> Self {
        Self {
            issues,
            tasks,
            links,
            hierarchy,
            cache,
            options,
            on_progress,
        }
    }

    /// Backfill `group_ids` in the order given.
    pub async fn run(&mut self, group_ids: &[GroupId]) -> BackfillReport {
        let mut report = BackfillReport {
            group_ids: group_ids.to_vec(),
            ..Default::default()
        };
        let mut incomplete = BTreeSet::new();

        emit(
            self.on_progress,
            SyncProgress::BackfillStarted {
                group_ids: group_ids.to_vec(),
            },
        );

        let linked = match self.linked_issue_urls().await {
            Ok(linked) => linked,
            Err(message) => {
                tracing::warn!(error = %message, "Failed to list existing tasks; deferring backfill");
                report.errors.push(message);
                report.incomplete_group_ids = group_ids.to_vec();
                self.emit_complete(&report);
                return report;
            }
        };

        let (queue, missing_sections) = self
            .queue_tasks(group_ids, &linked, &mut report, &mut incomplete)
            .await;
        report.queued = queue.len();

        if !self.options.dry_run {
            self.create_sections(missing_sections, &mut report).await;
            self.create_tasks(queue, &mut report, &mut incomplete).await;
        }

        report.completed_group_ids = group_ids
            .iter()
            .filter(|id| !incomplete.contains(*id))
            .cloned()
            .collect();
        report.incomplete_group_ids = incomplete.into_iter().collect();

        tracing::info!(
            queued = report.queued,
            created = report.created,
            failed = report.failed,
            sections = report.sections_created,
            incomplete = report.incomplete_group_ids.len(),
            "Backfill pass finished"
        );
        self.emit_complete(&report);
        report
    }

    fn emit_complete(&self, report: &BackfillReport) {
        emit(
            self.on_progress,
            SyncProgress::BackfillComplete {
                created: report.created,
                failed: report.failed,
                incomplete_groups: report.incomplete_group_ids.len(),
            },
        );
    }

    /// Issue URLs already linked from an active task, in one bulk call.
    async fn linked_issue_urls(&self) -> Result<HashSet<String>, String> {
        let tasks = self
            .tasks
            .list_active_tasks()
            .await
            .map_err(|e| format!("list_active_tasks: {}", short_error_message(&e)))?;

        Ok(tasks
            .iter()
            .filter_map(|task| {
                let repo = self.hierarchy.sub_group(&task.project_id).map(|g| g.full_name.as_str());
                let scope = LinkScope::new(&self.options.issue_web_url, repo);
                find_issue_link(&task.description, &scope).ok()
            })
            .map(|link| link.url)
            .collect())
    }

    async fn queue_tasks(
        &mut self,
        group_ids: &[GroupId],
        linked: &HashSet<String>,
        report: &mut BackfillReport,
        incomplete: &mut BTreeSet<GroupId>,
    ) -> (Vec<QueuedTask>, BTreeSet<NewSection>) {
        let cap = self.options.max_tasks_per_sync;
        let mut queue: Vec<QueuedTask> = Vec::new();
        let mut missing_sections = BTreeSet::new();

        for (index, group_id) in group_ids.iter().enumerate() {
            let Some(sub_group) = self.hierarchy.sub_group(group_id) else {
                continue;
            };

            if queue.len() >= cap {
                self.defer_remaining(&group_ids[index..], cap, incomplete);
                break;
            }

            let mut open = match self
                .issues
                .list_open_issues(&sub_group.org_name, &sub_group.repo_name)
                .await
            {
                Ok(open) => open,
                Err(e) => {
                    let message = format!("{}: {}", sub_group.full_name, short_error_message(&e));
                    tracing::warn!(repo = %sub_group.full_name, error = %message, "Failed to list open issues");
                    report.errors.push(message);
                    incomplete.insert(group_id.clone());
                    continue;
                }
            };
            open.sort_by_key(|issue| issue.number);

            if !self.cache.has_project(group_id)
                && let Err(e) = self.cache.refresh_sections(self.tasks, group_id).await
            {
                let message = format!("sections for {}: {}", sub_group.full_name, short_error_message(&e));
                tracing::warn!(repo = %sub_group.full_name, error = %message, "Failed to load sections");
                report.errors.push(message);
                incomplete.insert(group_id.clone());
                continue;
            }

            let mut queued_here = 0;
            let mut linked_here = 0;
            let mut capped = false;
            for issue in open {
                if issue.is_pull_request {
                    continue;
                }
                if linked.contains(&issue.url)
                    || self.links.task_for_issue(&issue.url).await.is_some()
                {
                    linked_here += 1;
                    continue;
                }
                if queue.len() >= cap {
                    capped = true;
                    break;
                }
                if let Some(name) = issue.milestone_title()
                    && self.cache.section_id(group_id, name).is_none()
                {
                    missing_sections.insert(NewSection {
                        project_id: group_id.clone(),
                        name: name.to_string(),
                    });
                }
                queue.push(QueuedTask {
                    group_id: group_id.clone(),
                    issue,
                });
                queued_here += 1;
            }

            report.already_linked += linked_here;
            emit(
                self.on_progress,
                SyncProgress::BackfillGroupQueued {
                    group_id: group_id.clone(),
                    repo: sub_group.full_name.clone(),
                    queued: queued_here,
                    already_linked: linked_here,
                },
            );

            if capped {
                self.defer_remaining(&group_ids[index..], cap, incomplete);
                break;
            }
        }

        (queue, missing_sections)
    }

    /// Mark `remaining` (the current group first) for the next pass.
    fn defer_remaining(&self, remaining: &[GroupId], cap: usize, incomplete: &mut BTreeSet<GroupId>) {
        tracing::info!(cap, deferred = remaining.len(), "Backfill task cap reached");
        emit(
            self.on_progress,
            SyncProgress::BackfillCapReached {
                cap,
                deferred_groups: remaining.len(),
            },
        );
        incomplete.extend(remaining.iter().cloned());
    }

    async fn create_sections(&mut self, missing: BTreeSet<NewSection>, report: &mut BackfillReport) {
        let requested: Vec<NewSection> = missing
            .into_iter()
            .take(self.options.max_sections_per_sync)
            .collect();
        if requested.is_empty() {
            return;
        }

        match self.tasks.batch_create_sections(&requested).await {
            Ok(outcomes) => {
                for (section, outcome) in requested.iter().zip(outcomes) {
                    match outcome.result {
                        Ok(id) => {
                            self.cache.insert_section(&Section {
                                id,
                                project_id: section.project_id.clone(),
                                name: section.name.clone(),
                            });
                            report.sections_created += 1;
                        }
                        Err(message) => {
                            report
                                .errors
                                .push(format!("section {}: {message}", section.name));
                        }
                    }
                }
            }
            Err(e) => {
                let message = format!("batch_create_sections: {}", short_error_message(&e));
                tracing::warn!(error = %message, "Failed to create sections");
                report.errors.push(message);
            }
        }
    }

    async fn create_tasks(
        &mut self,
        queue: Vec<QueuedTask>,
        report: &mut BackfillReport,
        incomplete: &mut BTreeSet<GroupId>,
    ) {
        let mut ready: Vec<(QueuedTask, NewTask)> = Vec::with_capacity(queue.len());
        for queued in queue {
            let section_id = match queued.section_name() {
                Some(name) => match self.cache.section_id(&queued.group_id, name) {
                    Some(id) => Some(id.to_string()),
                    None => {
                        report.deferred += 1;
                        incomplete.insert(queued.group_id.clone());
                        continue;
                    }
                },
                None => None,
            };
            let new_task = NewTask {
                content: canonical_title(queued.issue.number, &queued.issue.title),
                description: queued.issue.url.clone(),
                project_id: queued.group_id.clone(),
                section_id,
            };
            ready.push((queued, new_task));
        }

        for chunk in ready.chunks(self.options.max_batch_size.max(1)) {
            let new_tasks: Vec<NewTask> = chunk.iter().map(|(_, task)| task.clone()).collect();
            match self.tasks.batch_create_tasks(&new_tasks).await {
                Ok(outcomes) => {
                    for ((queued, _), outcome) in chunk.iter().zip(outcomes) {
                        match outcome.result {
                            Ok(task_id) => {
                                self.links.link(&task_id, &queued.issue.url).await;
                                report.created += 1;
                            }
                            Err(message) => {
                                report.failed += 1;
                                report.errors.push(format!("{}: {message}", queued.issue.url));
                                incomplete.insert(queued.group_id.clone());
                            }
                        }
                    }
                }
                Err(e) => {
                    let message = short_error_message(&e);
                    tracing::warn!(count = chunk.len(), error = %message, "Bulk task creation failed");
                    report.failed += chunk.len();
                    report.errors.push(format!("batch_create_tasks: {message}"));
                    incomplete.extend(chunk.iter().map(|(queued, _)| queued.group_id.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::platform::{IssueState, Project};
    use crate::store::{MemoryKvStore, task_key};
    use crate::sync::testing::{FakeIssueTracker, FakeTaskManager, issue_url, linked_task};
    use crate::sync::types::OrgMapping;

    struct Harness {
        issues: FakeIssueTracker,
        tasks: FakeTaskManager,
        kv: Arc<MemoryKvStore>,
        links: LinkStore,
        hierarchy: GroupHierarchy,
        cache: SectionMilestoneCache,
        options: SyncOptions,
    }

    impl Harness {
        /// Groups `ga`, `gb`, `gc` for repositories `acme/ra`, `acme/rb`, `acme/rc`.
        fn new() -> Self {
            let mut projects = vec![Project {
                id: "org".to_string(),
                name: "Acme".to_string(),
                parent_id: None,
            }];
            for suffix in ["a", "b", "c"] {
                projects.push(Project {
                    id: format!("g{suffix}"),
                    name: format!("r{suffix}"),
                    parent_id: Some("org".to_string()),
                });
            }
            let mapping: OrgMapping = [("org".to_string(), "acme".to_string())].into();
            let kv = Arc::new(MemoryKvStore::new());
            Self {
                issues: FakeIssueTracker::new(),
                tasks: FakeTaskManager::new(),
                links: LinkStore::new(kv.clone()),
                kv,
                hierarchy: GroupHierarchy::build(&projects, &mapping),
                cache: SectionMilestoneCache::new(),
                options: SyncOptions::default(),
            }
        }

        fn open_issues(&self, repo: &str, count: u64) {
            for number in 1..=count {
                self.issues
                    .add_issue("acme", repo, number, &format!("Issue {number}"), IssueState::Open, None);
            }
        }

        async fn run(&mut self, groups: &[&str]) -> BackfillReport {
            let group_ids: Vec<GroupId> = groups.iter().map(|g| g.to_string()).collect();
            Backfill::new(
                &self.issues,
                &self.tasks,
                &self.links,
                &self.hierarchy,
                &mut self.cache,
                &self.options,
                None,
            )
            .run(&group_ids)
            .await
        }
    }

    #[tokio::test]
    async fn cap_bounds_queued_tasks_and_defers_remaining_groups() {
        let mut h = Harness::new();
        h.open_issues("ra", 20);
        h.open_issues("rb", 20);
        h.open_issues("rc", 10);

        let report = h.run(&["ga", "gb", "gc"]).await;

        assert_eq!(report.queued, 30);
        assert_eq!(report.created, 30);
        assert_eq!(report.completed_group_ids, vec!["ga"]);
        assert_eq!(report.incomplete_group_ids, vec!["gb", "gc"]);
        assert_eq!(h.tasks.tasks_in("ga").len(), 20);
        assert_eq!(h.tasks.tasks_in("gb").len(), 10);
        assert!(h.tasks.tasks_in("gc").is_empty());
        assert_eq!(h.issues.call_count("list_open_issues"), 2);
    }

    #[tokio::test]
    async fn next_pass_resumes_without_duplicates() {
        let mut h = Harness::new();
        h.open_issues("ra", 20);
        h.open_issues("rb", 20);
        h.open_issues("rc", 10);
        let first = h.run(&["ga", "gb", "gc"]).await;

        let second = h.run(&["gb", "gc"]).await;

        assert_eq!(second.already_linked, 10);
        assert_eq!(second.created, 20);
        assert!(second.is_complete());
        assert_eq!(first.created + second.created, 50);
        assert_eq!(h.tasks.tasks_in("gb").len(), 20);
        assert_eq!(h.tasks.tasks_in("gc").len(), 10);
    }

    #[tokio::test]
    async fn already_linked_issues_are_skipped() {
        let mut h = Harness::new();
        h.open_issues("ra", 3);
        h.tasks.add_task(linked_task("t1", "ga", 1, "Issue 1", &issue_url("acme", "ra", 1)));

        let report = h.run(&["ga"]).await;

        assert_eq!(report.already_linked, 1);
        assert_eq!(report.created, 2);
        assert_eq!(h.tasks.tasks_in("ga").len(), 3);
        let created = h.tasks.tasks_in("ga").into_iter().find(|t| t.id != "t1").expect("task");
        assert!(h.kv.keys_with_prefix("task:").contains(&task_key(&created.id)));
    }

    #[tokio::test]
    async fn missing_sections_are_created_in_one_bulk_call() {
        let mut h = Harness::new();
        h.tasks.add_section("ga", "s-v1", "v1");
        h.issues.add_issue("acme", "ra", 1, "One", IssueState::Open, Some("v1"));
        h.issues.add_issue("acme", "ra", 2, "Two", IssueState::Open, Some("v2"));
        h.issues.add_issue("acme", "ra", 3, "Three", IssueState::Open, Some("v2"));

        let report = h.run(&["ga"]).await;

        assert_eq!(report.sections_created, 1);
        assert_eq!(report.created, 3);
        assert_eq!(h.tasks.call_count("batch_create_sections"), 1);
        assert_eq!(h.tasks.call_count("create_section"), 0);
        let v2 = h
            .tasks
            .sections_in("ga")
            .into_iter()
            .find(|s| s.name == "v2")
            .expect("v2 created");
        let in_v2 = h
            .tasks
            .tasks_in("ga")
            .into_iter()
            .filter(|t| t.section_id.as_deref() == Some(v2.id.as_str()))
            .count();
        assert_eq!(in_v2, 2);
    }

    #[tokio::test]
    async fn section_cap_defers_tasks_to_next_pass() {
        let mut h = Harness::new();
        h.options.max_sections_per_sync = 1;
        h.issues.add_issue("acme", "ra", 1, "One", IssueState::Open, Some("v1"));
        h.issues.add_issue("acme", "ra", 2, "Two", IssueState::Open, Some("v2"));

        let report = h.run(&["ga"]).await;

        assert_eq!(report.sections_created, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.incomplete_group_ids, vec!["ga"]);
    }

    #[tokio::test]
    async fn tasks_are_created_in_chunks() {
        let mut h = Harness::new();
        h.options.max_batch_size = 2;
        h.open_issues("ra", 5);

        let report = h.run(&["ga"]).await;

        assert_eq!(report.created, 5);
        assert_eq!(h.tasks.call_args("batch_create_tasks"), vec!["2", "2", "1"]);
    }

    #[tokio::test]
    async fn rejected_command_leaves_group_incomplete() {
        let mut h = Harness::new();
        h.open_issues("ra", 3);
        h.tasks.reject_content("[#2] Issue 2");

        let report = h.run(&["ga"]).await;

        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.incomplete_group_ids, vec!["ga"]);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn failing_repo_does_not_block_other_groups() {
        let mut h = Harness::new();
        h.open_issues("ra", 2);
        h.open_issues("rb", 2);
        h.issues.fail("list_open_issues:acme/ra");

        let report = h.run(&["ga", "gb"]).await;

        assert_eq!(report.created, 2);
        assert_eq!(report.completed_group_ids, vec!["gb"]);
        assert_eq!(report.incomplete_group_ids, vec!["ga"]);
    }

    #[tokio::test]
    async fn unavailable_task_listing_defers_everything() {
        let mut h = Harness::new();
        h.open_issues("ra", 2);
        h.tasks.fail("list_active_tasks");

        let report = h.run(&["ga", "gb"]).await;

        assert_eq!(report.created, 0);
        assert_eq!(report.incomplete_group_ids, vec!["ga", "gb"]);
        assert_eq!(h.issues.call_count("list_open_issues"), 0);
    }

    #[tokio::test]
    async fn dry_run_queues_without_creating() {
        let mut h = Harness::new();
        h.options.dry_run = true;
        h.open_issues("ra", 4);

        let report = h.run(&["ga"]).await;

        assert_eq!(report.queued, 4);
        assert_eq!(report.created, 0);
        assert_eq!(h.tasks.call_count("batch_create_tasks"), 0);
        assert!(h.kv.is_empty());
    }
}
