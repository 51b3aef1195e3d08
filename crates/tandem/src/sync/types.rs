//! Shared sync types and constants.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::platform::GroupId;

/// Default cap on tasks queued by one backfill pass.
pub const DEFAULT_MAX_TASKS_PER_SYNC: usize = 30;

/// Default cap on sections created by one backfill pass.
pub const DEFAULT_MAX_SECTIONS_PER_SYNC: usize = 10;

/// Default number of commands per bulk call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default interval between cycles in watch mode.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Consecutive failing cycles at which health becomes `error`.
pub const DEFAULT_HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Default lifetime of the cycle lease.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15 * 60);

/// Web base used to rebuild issue URLs from a task's title prefix.
pub const DEFAULT_ISSUE_WEB_URL: &str = "https://github.com";

/// Maps a parent group id to the organization it represents.
pub type OrgMapping = BTreeMap<GroupId, String>;

/// Options for a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Parent group id → organization name.
    pub org_mapping: OrgMapping,
    /// Hard cap on tasks queued per backfill pass.
    pub max_tasks_per_sync: usize,
    /// Hard cap on sections created per backfill pass.
    pub max_sections_per_sync: usize,
    /// Maximum commands in one bulk create call.
    pub max_batch_size: usize,
    /// Consecutive failures before health reports `error`.
    pub health_failure_threshold: u32,
    /// How long a cycle lease stays valid if never released.
    pub lease_ttl: Duration,
    /// Base for reconstructed issue URLs (`{base}/{org}/{repo}/issues/{n}`).
    pub issue_web_url: String,
    /// Dry run mode - decide but don't mutate or save.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            org_mapping: OrgMapping::new(),
            max_tasks_per_sync: DEFAULT_MAX_TASKS_PER_SYNC,
            max_sections_per_sync: DEFAULT_MAX_SECTIONS_PER_SYNC,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            health_failure_threshold: DEFAULT_HEALTH_FAILURE_THRESHOLD,
            lease_ttl: DEFAULT_LEASE_TTL,
            issue_web_url: DEFAULT_ISSUE_WEB_URL.to_string(),
            dry_run: false,
        }
    }
}

/// Why an entity was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The issue has no target group.
    NoProjectId,
    /// A native task whose project is not a tracked repository.
    NoRouting,
    /// A native task that is already done; issues are never created for it.
    AlreadyCompleted,
    /// The linked issue no longer exists.
    IssueNotFound,
    /// The task description carries an issue link that does not parse.
    MalformedLink,
    /// A completed task that was never linked to an issue.
    NotLinked,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoProjectId => "no_project_id",
            SkipReason::NoRouting => "no_routing",
            SkipReason::AlreadyCompleted => "already_completed",
            SkipReason::IssueNotFound => "issue_not_found",
            SkipReason::MalformedLink => "malformed_link",
            SkipReason::NotLinked => "not_linked",
        }
    }
}

/// Result of reconciling one entity. Never an `Err`: failures are the
/// `Error` variant so callers can tally without per-entity error handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A counterpart was created, optionally in/with the named section.
    Created { section: Option<String> },
    /// The counterpart's title or body was rewritten.
    Updated,
    /// The counterpart was completed/closed.
    Completed,
    /// The counterpart was reopened.
    Reopened,
    /// Section (task side) or milestone (issue side) was changed.
    SectionUpdated { section: Option<String> },
    Unchanged,
    Skipped { reason: SkipReason },
    Error { message: String },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created { .. } => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Completed => "completed",
            ReconcileOutcome::Reopened => "reopened",
            ReconcileOutcome::SectionUpdated { .. } => "section_updated",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::Skipped { .. } => "skipped",
            ReconcileOutcome::Error { .. } => "error",
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, ReconcileOutcome::Error { .. })
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Skipped { reason } => write!(f, "skipped ({})", reason.as_str()),
            ReconcileOutcome::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Per-direction counts of reconciliation outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub created: usize,
    pub updated: usize,
    pub completed: usize,
    pub reopened: usize,
    pub section_updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        let slot = match outcome {
            ReconcileOutcome::Created { .. } => &mut self.created,
            ReconcileOutcome::Updated => &mut self.updated,
            ReconcileOutcome::Completed => &mut self.completed,
            ReconcileOutcome::Reopened => &mut self.reopened,
            ReconcileOutcome::SectionUpdated { .. } => &mut self.section_updated,
            ReconcileOutcome::Unchanged => &mut self.unchanged,
            ReconcileOutcome::Skipped { .. } => &mut self.skipped,
            ReconcileOutcome::Error { .. } => &mut self.errors,
        };
        *slot += 1;
    }

    /// Entities that caused a change on the other side.
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.completed + self.reopened + self.section_updated
    }

    pub fn total(&self) -> usize {
        self.changed() + self.unchanged + self.skipped + self.errors
    }
}

/// Results of processing the completed-task feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// Completed tasks seen.
    pub processed: usize,
    /// Tasks whose issue link could not be resolved by any layer.
    pub unresolved: usize,
    pub outcomes: OutcomeTally,
}

/// A non-fatal failure recorded during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    /// What was being attempted, e.g. `poll_issues:acme/api`.
    pub operation: String,
    pub message: String,
    pub code: Option<u16>,
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Poll counter after this cycle.
    pub poll_count: u64,
    pub dry_run: bool,
    /// Sub-groups recorded as known without a backfill (first cycle only).
    pub baseline_groups: usize,
    pub backfill: Option<super::backfill::BackfillReport>,
    pub issues: OutcomeTally,
    pub tasks: OutcomeTally,
    pub completions: CompletionReport,
    /// Whether the task delta was a full snapshot.
    pub full_sync: bool,
    /// Whether each cursor moved this cycle.
    pub source_cursor_advanced: bool,
    pub sync_token_advanced: bool,
    pub completed_cursor_advanced: bool,
    pub failures: Vec<CycleFailure>,
}

impl CycleReport {
    /// True when nothing failed anywhere in the cycle.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.issues.errors == 0
            && self.tasks.errors == 0
            && self.completions.outcomes.errors == 0
            && self.completions.unresolved == 0
            && self
                .backfill
                .as_ref()
                .is_none_or(|b| b.failed == 0 && b.errors.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_options_default() {
        let options = SyncOptions::default();

        assert!(options.org_mapping.is_empty());
        assert_eq!(options.max_tasks_per_sync, 30);
        assert_eq!(options.max_sections_per_sync, 10);
        assert_eq!(options.max_batch_size, 100);
        assert_eq!(options.health_failure_threshold, 3);
        assert_eq!(options.issue_web_url, "https://github.com");
        assert!(!options.dry_run);
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(ReconcileOutcome::Created { section: None }.as_str(), "created");
        assert_eq!(
            ReconcileOutcome::SectionUpdated { section: None }.as_str(),
            "section_updated"
        );
        assert_eq!(
            ReconcileOutcome::Skipped {
                reason: SkipReason::NoProjectId
            }
            .to_string(),
            "skipped (no_project_id)"
        );
    }

    #[test]
    fn test_tally_counts_each_variant() {
        let mut tally = OutcomeTally::default();
        for outcome in [
            ReconcileOutcome::Created {
                section: Some("v1".to_string()),
            },
            ReconcileOutcome::Unchanged,
            ReconcileOutcome::Unchanged,
            ReconcileOutcome::Error {
                message: "boom".to_string(),
            },
        ] {
            tally.record(&outcome);
        }

        assert_eq!(tally.created, 1);
        assert_eq!(tally.unchanged, 2);
        assert_eq!(tally.errors, 1);
        assert_eq!(tally.changed(), 1);
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn test_cycle_report_clean_until_anything_fails() {
        let mut report = CycleReport::default();
        assert!(report.is_clean());

        report.completions.unresolved = 1;
        assert!(!report.is_clean());
    }
}
