//! The reconciliation engine.
//!
//! This module turns the two collaborator interfaces into a polling sync
//! between issues and tasks. Each cycle observes both sides, projects every
//! changed entity onto its counterpart, and persists cursors only as far as
//! processing actually succeeded.
//!
//! # Module Structure
//!
//! - [`types`] - Options, outcomes and the cycle report
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`state`] - Persisted cursors, error tracking and health
//! - [`hierarchy`] - Parent groups (organizations) and sub-groups (repositories)
//! - [`identity`] - Issue link and title prefix parsing
//! - [`cache`] - Per-cycle section ↔ milestone lookups
//! - [`pollers`] - Change feeds from both sides
//! - [`mapping`] - Durable links and completed-task resolution
//! - [`reconcile`] - Per-entity reconciliation in both directions
//! - [`backfill`] - Bulk creation of tasks for newly tracked groups
//! - [`orchestrator`] - `SyncContext` and the cycle itself
//!
//! # Example
//!
//! ```ignore
//! use tandem::sync::{SyncContext, SyncOptions, SyncProgress};
//!
//! let ctx = SyncContext::builder()
//!     .issue_tracker(github)
//!     .task_manager(todoist)
//!     .store(store)
//!     .options(SyncOptions::default())
//!     .build()?;
//!
//! let report = ctx.run_cycle().await?;
//! if !report.is_clean() {
//!     eprintln!("{} failures", report.failures.len());
//! }
//! ```

pub mod backfill;
pub mod cache;
pub mod hierarchy;
pub mod identity;
pub mod mapping;
pub mod orchestrator;
pub mod pollers;
pub mod progress;
pub mod reconcile;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export types
pub use types::{
    CompletionReport, CycleFailure, CycleReport, OrgMapping, OutcomeTally, ReconcileOutcome,
    SkipReason, SyncOptions,
};

// Re-export constants
pub use types::{
    DEFAULT_HEALTH_FAILURE_THRESHOLD, DEFAULT_ISSUE_WEB_URL, DEFAULT_LEASE_TTL,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_SECTIONS_PER_SYNC, DEFAULT_MAX_TASKS_PER_SYNC,
    DEFAULT_POLL_INTERVAL_SECS,
};

// Re-export progress types
pub use progress::{EntityKind, ProgressCallback, SyncProgress, emit};

pub use backfill::BackfillReport;
pub use hierarchy::{GroupHierarchy, ParentGroup, SubGroup};
pub use identity::{
    IssueLink, LinkParseError, LinkScope, canonical_title, find_issue_link, parse_issue_link,
};
pub use orchestrator::{BackfillScope, SyncContext, SyncContextBuilder, SyncError};
pub use state::{
    ErrorInfo, ErrorTracking, ForceBackfill, HealthStatus, SyncHealth, SyncState, SyncStateStore,
};
