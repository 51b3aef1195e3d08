//! Collaborator interfaces for the two synchronized systems.
//!
//! This module defines the domain entities both sides are projected onto,
//! the [`IssueTracker`] and [`TaskManager`] traits the sync engine drives,
//! and the shared outbound-call plumbing (errors and rate limiting).
//!
//! # Example
//!
//! ```ignore
//! use tandem::platform::{IssueTracker, TaskManager};
//!
//! async fn open_issue_count<I: IssueTracker>(tracker: &I) -> Result<usize, ApiError> {
//!     Ok(tracker.list_open_issues("acme", "api").await?.len())
//! }
//! ```

mod errors;
mod rate_limit;
mod types;

pub use errors::{ApiError, Result, short_error_message};
pub use rate_limit::{ApiRateLimiter, rate_limits};
pub use types::{
    BatchOutcome, CompletedTask, GroupId, Issue, IssueRouting, IssueState, IssueTracker,
    Milestone, NewIssue, NewSection, NewTask, Project, Section, SyncDelta, Task, TaskManager,
    TaskRouting, TaskUpdate, mentions,
};
