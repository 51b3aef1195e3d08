//! Todoist task client.
//!
//! Reads use the Sync v9 API for incremental changes and completed-task
//! history, and REST v2 for projects, sections and single tasks. Bulk
//! creation goes through batched Sync API commands.

mod client;
mod convert;
mod error;
mod types;

pub use client::{TODOIST_API_URL, TodoistClient};
pub use convert::batch_outcomes;
pub use error::error_from_response;
pub use types::{Command, SyncItem, SyncResponse};
