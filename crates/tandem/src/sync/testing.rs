//! In-memory fakes of both external systems for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::platform::{
    self, ApiError, BatchOutcome, CompletedTask, Issue, IssueState, IssueTracker, Milestone,
    NewIssue, NewSection, NewTask, Project, Section, SyncDelta, Task, TaskManager, TaskUpdate,
};

/// Record of calls plus injected failures shared by both fakes.
#[derive(Default)]
struct CallLog {
    calls: Vec<(String, String)>,
    failures: HashSet<String>,
}

impl CallLog {
    /// Log `op` with `arg`; fail if `op` or `op:arg` was registered.
    fn check(&mut self, op: &str, arg: &str) -> platform::Result<()> {
        self.calls.push((op.to_string(), arg.to_string()));
        let keyed = format!("{op}:{arg}");
        if self.failures.contains(op) || self.failures.contains(&keyed) {
            return Err(ApiError::status(500, format!("injected failure: {keyed}")));
        }
        Ok(())
    }

    fn count(&self, op: &str) -> usize {
        self.calls.iter().filter(|(o, _)| o == op).count()
    }

    fn args(&self, op: &str) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

pub fn issue_url(org: &str, repo: &str, number: u64) -> String {
    format!("https://github.com/{org}/{repo}/issues/{number}")
}

// ---------- Issue tracker ----------

#[derive(Default)]
struct IssueData {
    issues: BTreeMap<(String, String), BTreeMap<u64, Issue>>,
    milestones: HashMap<(String, String), Vec<Milestone>>,
    list_latency: Option<Duration>,
    log: CallLog,
}

#[derive(Default)]
pub struct FakeIssueTracker {
    data: Mutex<IssueData>,
}

impl FakeIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, IssueData> {
        self.data.lock().expect("fake issue tracker lock")
    }

    /// Delay every issue listing, for cycles that must outlive their lease.
    pub fn set_list_latency(&self, latency: Duration) {
        self.data().list_latency = Some(latency);
    }

    pub fn add_issue(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        title: &str,
        state: IssueState,
        milestone: Option<&str>,
    ) -> Issue {
        let mut data = self.data();
        let milestone = milestone.map(|title| {
            let key = (org.to_string(), repo.to_string());
            let list = data.milestones.entry(key).or_default();
            match list.iter().find(|m| m.title == title) {
                Some(existing) => existing.clone(),
                None => {
                    let created = Milestone {
                        number: list.len() as u64 + 1,
                        title: title.to_string(),
                    };
                    list.push(created.clone());
                    created
                }
            }
        });
        let issue = Issue {
            number,
            title: title.to_string(),
            url: issue_url(org, repo, number),
            state,
            body: None,
            milestone,
            is_pull_request: false,
            updated_at: None,
            routing: None,
        };
        data.issues
            .entry((org.to_string(), repo.to_string()))
            .or_default()
            .insert(number, issue.clone());
        issue
    }

    pub fn add_pull_request(&self, org: &str, repo: &str, number: u64) {
        let mut issue = self.add_issue(org, repo, number, "PR", IssueState::Open, None);
        issue.is_pull_request = true;
        self.data()
            .issues
            .entry((org.to_string(), repo.to_string()))
            .or_default()
            .insert(number, issue);
    }

    pub fn add_milestone(&self, org: &str, repo: &str, milestone: Milestone) {
        self.data()
            .milestones
            .entry((org.to_string(), repo.to_string()))
            .or_default()
            .push(milestone);
    }

    pub fn issue(&self, org: &str, repo: &str, number: u64) -> Option<Issue> {
        self.data()
            .issues
            .get(&(org.to_string(), repo.to_string()))
            .and_then(|issues| issues.get(&number))
            .cloned()
    }

    pub fn issue_count(&self, org: &str, repo: &str) -> usize {
        self.data()
            .issues
            .get(&(org.to_string(), repo.to_string()))
            .map_or(0, BTreeMap::len)
    }

    /// Make `op` fail, or `op` for one argument with `op:arg`.
    pub fn fail(&self, key: &str) {
        self.data().log.failures.insert(key.to_string());
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.data().log.count(op)
    }

    pub fn call_args(&self, op: &str) -> Vec<String> {
        self.data().log.args(op)
    }
}

#[async_trait]
impl IssueTracker for FakeIssueTracker {
    async fn list_issues_updated_since(
        &self,
        org: &str,
        repo: &str,
        since: Option<DateTime<Utc>>,
    ) -> platform::Result<Vec<Issue>> {
        let latency = self.data().list_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut data = self.data();
        let arg = match since {
            Some(since) => format!("{org}/{repo}@{}", since.to_rfc3339()),
            None => format!("{org}/{repo}"),
        };
        data.log.check("list_issues_updated_since", &arg)?;
        data.log.check("list_repo", &format!("{org}/{repo}"))?;
        Ok(data
            .issues
            .get(&(org.to_string(), repo.to_string()))
            .map(|issues| issues.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_open_issues(&self, org: &str, repo: &str) -> platform::Result<Vec<Issue>> {
        let mut data = self.data();
        data.log.check("list_open_issues", &format!("{org}/{repo}"))?;
        Ok(data
            .issues
            .get(&(org.to_string(), repo.to_string()))
            .map(|issues| {
                issues
                    .values()
                    .filter(|i| i.is_open() && !i.is_pull_request)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_issue(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> platform::Result<Option<Issue>> {
        let mut data = self.data();
        data.log.check("get_issue", &format!("{org}/{repo}#{number}"))?;
        Ok(data
            .issues
            .get(&(org.to_string(), repo.to_string()))
            .and_then(|issues| issues.get(&number))
            .cloned())
    }

    async fn create_issue(
        &self,
        org: &str,
        repo: &str,
        issue: &NewIssue,
    ) -> platform::Result<Issue> {
        let mut data = self.data();
        data.log.check("create_issue", &format!("{org}/{repo}"))?;
        let key = (org.to_string(), repo.to_string());
        let milestone = issue.milestone.and_then(|n| {
            data.milestones
                .get(&key)
                .and_then(|list| list.iter().find(|m| m.number == n).cloned())
        });
        let issues = data.issues.entry(key).or_default();
        let number = issues.keys().next_back().map_or(1, |n| n + 1);
        let created = Issue {
            number,
            title: issue.title.clone(),
            url: issue_url(org, repo, number),
            state: IssueState::Open,
            body: issue.body.clone(),
            milestone,
            is_pull_request: false,
            updated_at: None,
            routing: None,
        };
        issues.insert(number, created.clone());
        Ok(created)
    }

    async fn set_issue_state(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        state: IssueState,
    ) -> platform::Result<()> {
        let mut data = self.data();
        data.log
            .check("set_issue_state", &format!("{org}/{repo}#{number}"))?;
        let issue = data
            .issues
            .get_mut(&(org.to_string(), repo.to_string()))
            .and_then(|issues| issues.get_mut(&number))
            .ok_or_else(|| ApiError::status(404, "Not Found"))?;
        issue.state = state;
        Ok(())
    }

    async fn set_issue_milestone(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        milestone: Option<u64>,
    ) -> platform::Result<()> {
        let mut data = self.data();
        data.log
            .check("set_issue_milestone", &format!("{org}/{repo}#{number}"))?;
        let key = (org.to_string(), repo.to_string());
        let resolved = match milestone {
            Some(n) => Some(
                data.milestones
                    .get(&key)
                    .and_then(|list| list.iter().find(|m| m.number == n).cloned())
                    .ok_or_else(|| ApiError::status(422, "milestone does not exist"))?,
            ),
            None => None,
        };
        let issue = data
            .issues
            .get_mut(&key)
            .and_then(|issues| issues.get_mut(&number))
            .ok_or_else(|| ApiError::status(404, "Not Found"))?;
        issue.milestone = resolved;
        Ok(())
    }

    async fn list_milestones(&self, org: &str, repo: &str) -> platform::Result<Vec<Milestone>> {
        let mut data = self.data();
        data.log.check("list_milestones", &format!("{org}/{repo}"))?;
        Ok(data
            .milestones
            .get(&(org.to_string(), repo.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// ---------- Task manager ----------

#[derive(Default)]
struct TaskData {
    projects: Vec<Project>,
    sections: Vec<Section>,
    tasks: BTreeMap<String, Task>,
    completed: Vec<CompletedTask>,
    delta: Option<Vec<Task>>,
    rejected_contents: HashSet<String>,
    section_race: Option<Section>,
    next_id: u64,
    next_token: u64,
    log: CallLog,
}

impl TaskData {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn insert_new_task(&mut self, task: &NewTask) -> Task {
        let created = Task {
            id: self.next_id("task-"),
            content: task.content.clone(),
            description: task.description.clone(),
            project_id: task.project_id.clone(),
            section_id: task.section_id.clone(),
            completed: false,
            is_deleted: false,
            routing: None,
        };
        self.tasks.insert(created.id.clone(), created.clone());
        created
    }

    fn insert_new_section(&mut self, project_id: &str, name: &str) -> Section {
        let section = Section {
            id: self.next_id("section-"),
            project_id: project_id.to_string(),
            name: name.to_string(),
        };
        self.sections.push(section.clone());
        section
    }

    fn task_mut(&mut self, task_id: &str) -> platform::Result<&mut Task> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| ApiError::status(404, "Task not found"))
    }
}

#[derive(Default)]
pub struct FakeTaskManager {
    data: Mutex<TaskData>,
}

impl FakeTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, TaskData> {
        self.data.lock().expect("fake task manager lock")
    }

    pub fn add_project(&self, id: &str, name: &str, parent_id: Option<&str>) {
        self.data().projects.push(Project {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        });
    }

    pub fn add_section(&self, project_id: &str, id: &str, name: &str) {
        self.data().sections.push(Section {
            id: id.to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_task(&self, task: Task) {
        self.data().tasks.insert(task.id.clone(), task);
    }

    pub fn add_completed(&self, completed: CompletedTask) {
        self.data().completed.push(completed);
    }

    /// Override the items returned by `sync_delta`.
    pub fn set_delta(&self, items: Vec<Task>) {
        self.data().delta = Some(items);
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.data().tasks.get(task_id).cloned()
    }

    pub fn tasks_in(&self, project_id: &str) -> Vec<Task> {
        self.data()
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn sections_in(&self, project_id: &str) -> Vec<Section> {
        self.data()
            .sections
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Make `op` fail, or `op` for one argument with `op:arg`.
    pub fn fail(&self, key: &str) {
        self.data().log.failures.insert(key.to_string());
    }

    pub fn fail_list_sections(&self, project_id: &str) {
        self.fail(&format!("list_sections:{project_id}"));
    }

    /// Simulate a concurrent writer: the section appears, but our create fails.
    pub fn fail_create_section_after_adding(&self, project_id: &str, id: &str, name: &str) {
        self.data().section_race = Some(Section {
            id: id.to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
        });
    }

    /// Bulk creates of tasks with this content report a per-command failure.
    pub fn reject_content(&self, content: &str) {
        self.data().rejected_contents.insert(content.to_string());
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.data().log.count(op)
    }

    pub fn call_args(&self, op: &str) -> Vec<String> {
        self.data().log.args(op)
    }
}

#[async_trait]
impl TaskManager for FakeTaskManager {
    async fn sync_delta(&self, token: &str) -> platform::Result<SyncDelta> {
        let mut data = self.data();
        data.log.check("sync_delta", token)?;
        data.next_token += 1;
        let items = match &data.delta {
            Some(items) => items.clone(),
            None => data.tasks.values().cloned().collect(),
        };
        Ok(SyncDelta {
            items,
            sync_token: format!("token-{}", data.next_token),
            full_sync: token == "*",
        })
    }

    async fn completed_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> platform::Result<Vec<CompletedTask>> {
        let mut data = self.data();
        let arg = since.map(|s| s.to_rfc3339()).unwrap_or_default();
        data.log.check("completed_since", &arg)?;
        Ok(data
            .completed
            .iter()
            .filter(|c| since.is_none_or(|s| c.completed_at >= s))
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> platform::Result<Option<Task>> {
        let mut data = self.data();
        data.log.check("get_task", task_id)?;
        Ok(data.tasks.get(task_id).cloned())
    }

    async fn find_task_by_description(
        &self,
        project_id: &str,
        needle: &str,
    ) -> platform::Result<Option<Task>> {
        let mut data = self.data();
        data.log.check("find_task_by_description", project_id)?;
        Ok(data
            .tasks
            .values()
            .find(|t| t.project_id == project_id && !t.completed && platform::mentions(&t.description, needle))
            .cloned())
    }

    async fn list_active_tasks(&self) -> platform::Result<Vec<Task>> {
        let mut data = self.data();
        data.log.check("list_active_tasks", "")?;
        Ok(data.tasks.values().filter(|t| !t.completed).cloned().collect())
    }

    async fn create_task(&self, task: &NewTask) -> platform::Result<Task> {
        let mut data = self.data();
        data.log.check("create_task", &task.project_id)?;
        Ok(data.insert_new_task(task))
    }

    async fn update_task(&self, task_id: &str, update: &TaskUpdate) -> platform::Result<()> {
        let mut data = self.data();
        data.log.check("update_task", task_id)?;
        let task = data.task_mut(task_id)?;
        if let Some(content) = &update.content {
            task.content = content.clone();
        }
        if let Some(description) = &update.description {
            task.description = description.clone();
        }
        Ok(())
    }

    async fn move_task(
        &self,
        task_id: &str,
        project_id: &str,
        section_id: Option<&str>,
    ) -> platform::Result<()> {
        let mut data = self.data();
        data.log.check("move_task", task_id)?;
        let task = data.task_mut(task_id)?;
        task.project_id = project_id.to_string();
        task.section_id = section_id.map(str::to_string);
        Ok(())
    }

    async fn close_task(&self, task_id: &str) -> platform::Result<()> {
        let mut data = self.data();
        data.log.check("close_task", task_id)?;
        data.task_mut(task_id)?.completed = true;
        Ok(())
    }

    async fn reopen_task(&self, task_id: &str) -> platform::Result<()> {
        let mut data = self.data();
        data.log.check("reopen_task", task_id)?;
        data.task_mut(task_id)?.completed = false;
        Ok(())
    }

    async fn list_projects(&self) -> platform::Result<Vec<Project>> {
        let mut data = self.data();
        data.log.check("list_projects", "")?;
        Ok(data.projects.clone())
    }

    async fn list_sections(&self, project_id: &str) -> platform::Result<Vec<Section>> {
        let mut data = self.data();
        data.log.check("list_sections", project_id)?;
        Ok(data
            .sections
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn create_section(&self, project_id: &str, name: &str) -> platform::Result<Section> {
        let mut data = self.data();
        data.log.check("create_section", project_id)?;
        if let Some(raced) = data.section_race.take() {
            data.sections.push(raced);
            return Err(ApiError::status(409, "section already exists"));
        }
        Ok(data.insert_new_section(project_id, name))
    }

    async fn batch_create_sections(
        &self,
        sections: &[NewSection],
    ) -> platform::Result<Vec<BatchOutcome>> {
        let mut data = self.data();
        data.log
            .check("batch_create_sections", &sections.len().to_string())?;
        Ok(sections
            .iter()
            .map(|s| BatchOutcome::ok(data.insert_new_section(&s.project_id, &s.name).id))
            .collect())
    }

    async fn batch_create_tasks(&self, tasks: &[NewTask]) -> platform::Result<Vec<BatchOutcome>> {
        let mut data = self.data();
        data.log
            .check("batch_create_tasks", &tasks.len().to_string())?;
        Ok(tasks
            .iter()
            .map(|t| {
                if data.rejected_contents.contains(&t.content) {
                    BatchOutcome::failed("rejected")
                } else {
                    BatchOutcome::ok(data.insert_new_task(t).id)
                }
            })
            .collect())
    }
}

/// A task in `project_id` linked to `url`.
pub fn linked_task(id: &str, project_id: &str, number: u64, title: &str, url: &str) -> Task {
    Task {
        id: id.to_string(),
        content: format!("[#{number}] {title}"),
        description: url.to_string(),
        project_id: project_id.to_string(),
        section_id: None,
        completed: false,
        is_deleted: false,
        routing: None,
    }
}

/// A task with no issue link.
pub fn native_task(id: &str, project_id: &str, content: &str) -> Task {
    Task {
        id: id.to_string(),
        content: content.to_string(),
        description: String::new(),
        project_id: project_id.to_string(),
        section_id: None,
        completed: false,
        is_deleted: false,
        routing: None,
    }
}
