//! Progress reporting for sync cycles.
//!
//! Every engine event is mapped to a structured tracing call. Per-entity
//! detail is logged at debug so watch mode stays quiet unless something
//! changed or failed.

use std::sync::Arc;

use tandem::sync::{ProgressCallback, SyncProgress};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    /// Convert to a ProgressCallback for the library.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| {
            reporter.handle(event);
        }))
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::CycleStarted {
                poll_count,
                dry_run,
            } => {
                tracing::debug!(poll_count, dry_run, "Cycle started");
            }

            SyncProgress::HierarchyBuilt {
                parent_groups,
                sub_groups,
            } => {
                tracing::debug!(parent_groups, sub_groups, "Group hierarchy built");
            }

            SyncProgress::BaselineRecorded { groups } => {
                tracing::info!(groups, "Recorded baseline of tracked repositories");
            }

            SyncProgress::BackfillStarted { group_ids } => {
                tracing::info!(groups = group_ids.len(), group_ids = ?group_ids, "Backfilling groups");
            }

            SyncProgress::BackfillGroupQueued {
                group_id,
                repo,
                queued,
                already_linked,
            } => {
                tracing::info!(group_id = %group_id, repo = %repo, queued, already_linked, "Queued open issues");
            }

            SyncProgress::BackfillCapReached {
                cap,
                deferred_groups,
            } => {
                tracing::warn!(cap, deferred_groups, "Backfill cap reached, continuing next cycle");
            }

            SyncProgress::BackfillComplete {
                created,
                failed,
                incomplete_groups,
            } => {
                if failed > 0 {
                    tracing::warn!(created, failed, incomplete_groups, "Backfill finished with failures");
                } else {
                    tracing::info!(created, incomplete_groups, "Backfill finished");
                }
            }

            SyncProgress::PollingRepo { repo } => {
                tracing::debug!(repo = %repo, "Polling repository");
            }

            SyncProgress::RepoPollFailed { repo, error } => {
                tracing::warn!(repo = %repo, error = %error, "Repository poll failed");
            }

            SyncProgress::TasksPolled { count, full_sync } => {
                tracing::debug!(count, full_sync, "Polled task changes");
            }

            SyncProgress::CompletedPolled { count } => {
                tracing::debug!(count, "Polled completed tasks");
            }

            SyncProgress::EntityReconciled { kind, id, outcome } => {
                if outcome != "unchanged" {
                    tracing::info!(kind = kind.as_str(), id = %id, outcome = %outcome, "Reconciled");
                }
            }

            SyncProgress::CompletionUnresolved { task_id } => {
                tracing::warn!(task_id = %task_id, "Completed task has no resolvable issue");
            }

            SyncProgress::CycleComplete {
                issues_changed,
                tasks_changed,
                completions_closed,
                errors,
            } => {
                tracing::debug!(issues_changed, tasks_changed, completions_closed, errors, "Cycle complete");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
