//! Todoist API data types.
//!
//! The Sync v9 endpoints carry incremental changes, completed-task history
//! and batched commands; REST v2 covers single-entity reads and writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Item as it appears in `/sync/v9/sync` and `/sync/v9/items/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncItem {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    /// Completed flag in the Sync API.
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Response of `/sync/v9/sync`, for both reads and command writes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub items: Vec<SyncItem>,
    #[serde(default)]
    pub sync_token: String,
    #[serde(default)]
    pub full_sync: bool,
    /// Per-command result keyed by command uuid: `"ok"` or an error object.
    #[serde(default)]
    pub sync_status: HashMap<String, serde_json::Value>,
    /// Maps command temp ids to the ids the server assigned.
    #[serde(default)]
    pub temp_id_mapping: HashMap<String, String>,
}

/// Response of `/sync/v9/items/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemGetResponse {
    pub item: SyncItem,
}

/// One entry of `/sync/v9/completed/get_all`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedItem {
    pub task_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    /// Full item, present when `annotate_items=true`.
    #[serde(default)]
    pub item_object: Option<SyncItem>,
}

/// Response of `/sync/v9/completed/get_all`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletedResponse {
    #[serde(default)]
    pub items: Vec<CompletedItem>,
}

/// Task as returned by REST v2.
#[derive(Debug, Clone, Deserialize)]
pub struct RestTask {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
}

/// Project as returned by REST v2.
#[derive(Debug, Clone, Deserialize)]
pub struct RestProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Section as returned by REST v2.
#[derive(Debug, Clone, Deserialize)]
pub struct RestSection {
    pub id: String,
    pub project_id: String,
    pub name: String,
}

/// Body for `POST /rest/v2/tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTaskBody<'a> {
    pub content: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub description: &'a str,
    pub project_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<&'a str>,
}

/// Body for `POST /rest/v2/tasks/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateTaskBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

/// One Sync API write command.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub args: serde_json::Value,
}

impl Command {
    /// Build a command with fresh uuid; creating commands also get a temp id.
    pub fn new(kind: &'static str, args: serde_json::Value, with_temp_id: bool) -> Self {
        Self {
            kind,
            uuid: uuid::Uuid::new_v4().to_string(),
            temp_id: with_temp_id.then(|| uuid::Uuid::new_v4().to_string()),
            args,
        }
    }
}
