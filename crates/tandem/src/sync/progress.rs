//! Progress reporting types for sync cycles.
//!
//! The engine emits these events through an optional callback so a front
//! end can log or display them without the engine knowing how.

use crate::platform::GroupId;

/// Which side an entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Issue,
    Task,
    CompletedTask,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Issue => "issue",
            EntityKind::Task => "task",
            EntityKind::CompletedTask => "completed_task",
        }
    }
}

/// Progress events emitted during a sync cycle.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A cycle is starting.
    CycleStarted {
        /// Poll counter value this cycle will produce.
        poll_count: u64,
        dry_run: bool,
    },

    /// The group hierarchy was rebuilt from the live project listing.
    HierarchyBuilt {
        parent_groups: usize,
        sub_groups: usize,
    },

    /// First cycle: current sub-groups recorded as known without backfill.
    BaselineRecorded { groups: usize },

    /// Backfill is starting for these groups.
    BackfillStarted { group_ids: Vec<GroupId> },

    /// Open issues for one group were queued for creation.
    BackfillGroupQueued {
        group_id: GroupId,
        repo: String,
        queued: usize,
        already_linked: usize,
    },

    /// The per-cycle task cap was reached; remaining groups continue later.
    BackfillCapReached {
        cap: usize,
        deferred_groups: usize,
    },

    /// Backfill finished for this cycle.
    BackfillComplete {
        created: usize,
        failed: usize,
        incomplete_groups: usize,
    },

    /// Polling one repository for updated issues.
    PollingRepo { repo: String },

    /// A repository poll failed; the cycle continues.
    RepoPollFailed { repo: String, error: String },

    /// Changed-task delta fetched.
    TasksPolled { count: usize, full_sync: bool },

    /// Completed-task feed fetched.
    CompletedPolled { count: usize },

    /// One entity was reconciled.
    EntityReconciled {
        kind: EntityKind,
        id: String,
        outcome: String,
    },

    /// A completed task's issue link could not be resolved.
    CompletionUnresolved { task_id: String },

    /// Cycle finished.
    CycleComplete {
        issues_changed: usize,
        tasks_changed: usize,
        completions_closed: usize,
        errors: usize,
    },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback type for progress reporting.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
