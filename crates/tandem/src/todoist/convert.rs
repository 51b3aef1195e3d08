//! Validation of Todoist payloads into domain entities.

use serde::de::DeserializeOwned;

use crate::platform::{ApiError, BatchOutcome, CompletedTask, Project, Section, Task};

use super::types::{
    Command, CompletedItem, RestProject, RestSection, RestTask, SyncItem, SyncResponse,
};

/// Deserialize a JSON body, reporting failures as validation errors.
pub fn parse_json<T: DeserializeOwned>(entity: &'static str, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::validation(entity, e.to_string()))
}

fn require_id(entity: &'static str, field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(entity, format!("empty {field}")));
    }
    Ok(())
}

/// Convert a Sync API item into a [`Task`].
pub fn sync_item_to_task(item: SyncItem) -> Result<Task, ApiError> {
    require_id("task", "id", &item.id)?;
    // Deleted tombstones may arrive without a project.
    if !item.is_deleted {
        require_id("task", "project_id", &item.project_id)?;
    }

    Ok(Task {
        id: item.id,
        content: item.content,
        description: item.description,
        project_id: item.project_id,
        section_id: item.section_id.filter(|s| !s.is_empty()),
        completed: item.checked,
        is_deleted: item.is_deleted,
        routing: None,
    })
}

/// Convert a REST task into a [`Task`].
pub fn rest_task_to_task(task: RestTask) -> Result<Task, ApiError> {
    require_id("task", "id", &task.id)?;
    require_id("task", "project_id", &task.project_id)?;

    Ok(Task {
        id: task.id,
        content: task.content,
        description: task.description,
        project_id: task.project_id,
        section_id: task.section_id.filter(|s| !s.is_empty()),
        completed: task.is_completed,
        is_deleted: false,
        routing: None,
    })
}

/// Convert a completed-feed entry into a [`CompletedTask`].
pub fn completed_item_to_task(item: CompletedItem) -> Result<CompletedTask, ApiError> {
    require_id("completed task", "task_id", &item.task_id)?;

    let (description, section_id) = match item.item_object {
        Some(object) => (
            Some(object.description),
            object.section_id.or(item.section_id),
        ),
        None => (None, item.section_id),
    };

    Ok(CompletedTask {
        task_id: item.task_id,
        content: item.content,
        description,
        project_id: item.project_id,
        section_id: section_id.filter(|s| !s.is_empty()),
        completed_at: item.completed_at,
        routing: None,
    })
}

pub fn to_project(project: RestProject) -> Result<Project, ApiError> {
    require_id("project", "id", &project.id)?;
    Ok(Project {
        id: project.id,
        name: project.name,
        parent_id: project.parent_id.filter(|p| !p.is_empty()),
    })
}

pub fn to_section(section: RestSection) -> Result<Section, ApiError> {
    require_id("section", "id", &section.id)?;
    Ok(Section {
        id: section.id,
        project_id: section.project_id,
        name: section.name,
    })
}

/// Describe a non-`"ok"` command status.
fn status_error(status: &serde_json::Value) -> String {
    status
        .get("error")
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

/// Pair each command with its result, in command order.
///
/// A command succeeds only when its status is `"ok"` and, for creating
/// commands, the server mapped its temp id to a real id.
pub fn batch_outcomes(commands: &[Command], response: &SyncResponse) -> Vec<BatchOutcome> {
    commands
        .iter()
        .map(|command| match response.sync_status.get(&command.uuid) {
            Some(serde_json::Value::String(s)) if s == "ok" => match &command.temp_id {
                Some(temp_id) => match response.temp_id_mapping.get(temp_id) {
                    Some(id) => BatchOutcome::ok(id.clone()),
                    None => BatchOutcome::failed("no id assigned for temp id"),
                },
                None => BatchOutcome::ok(String::new()),
            },
            Some(status) => BatchOutcome::failed(status_error(status)),
            None => BatchOutcome::failed("no status returned for command"),
        })
        .collect()
}
