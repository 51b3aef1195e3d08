//! Sync context and the cycle orchestrator.
//!
//! A [`SyncContext`] owns the two collaborators, the key-value store and the
//! options. [`SyncContext::run_cycle`] runs one full cycle:
//!
//! 1. rebuild the group hierarchy and prime section caches
//! 2. record a baseline or backfill new and requested groups
//! 3. poll and reconcile updated issues
//! 4. poll and reconcile the task delta
//! 5. resolve and reconcile completed tasks
//! 6. advance cursors that are safe to advance and save the state
//!
//! # Example
//!
//! ```ignore
//! use tandem::sync::{SyncContext, SyncOptions};
//!
//! let ctx = SyncContext::builder()
//!     .issue_tracker(github)
//!     .task_manager(todoist)
//!     .store(store)
//!     .options(SyncOptions::default())
//!     .build()?;
//!
//! let report = ctx.run_cycle().await?;
//! println!("{} issues changed", report.issues.changed());
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::backfill::Backfill;
use super::cache::SectionMilestoneCache;
use super::hierarchy::GroupHierarchy;
use super::mapping::{LinkStore, MappingResolver, Resolution};
use super::pollers::{poll_completed, poll_issues, poll_tasks};
use super::progress::{EntityKind, ProgressCallback, SyncProgress, emit};
use super::reconcile::Reconciler;
use super::state::{ErrorInfo, ForceBackfill, SyncHealth, SyncState, SyncStateStore};
use super::types::{
    CycleFailure, CycleReport, OutcomeTally, ReconcileOutcome, SkipReason, SyncOptions,
};
use crate::platform::{
    ApiError, CompletedTask, GroupId, IssueTracker, TaskManager, short_error_message,
};
use crate::store::{KvStore, SYNC_LEASE_KEY, StoreError};

/// Error type for sync context operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The configuration cannot produce a usable cycle.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required field in builder.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// An external call failed outside per-entity handling.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Another cycle or operator command is running against this state.
    #[error("Another sync is in progress (lease held)")]
    LeaseHeld,

    /// The lease expired mid-cycle and may now belong to another run.
    #[error("Sync lease was lost mid-cycle")]
    LeaseLost,
}

impl SyncError {
    /// HTTP status behind the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::Api(e) => e.status_code(),
            _ => None,
        }
    }
}

/// Result type for sync context operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Which groups an operator wants backfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillScope {
    All,
    Groups(Vec<GroupId>),
}

/// A lease held by this process.
struct Lease {
    holder: String,
    renewed_at: Instant,
}

/// Builder for creating a `SyncContext`.
#[derive(Default)]
pub struct SyncContextBuilder {
    issues: Option<Arc<dyn IssueTracker>>,
    tasks: Option<Arc<dyn TaskManager>>,
    store: Option<Arc<dyn KvStore>>,
    options: Option<SyncOptions>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the issue tracker.
    pub fn issue_tracker(mut self, issues: Arc<dyn IssueTracker>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Set the task manager.
    pub fn task_manager(mut self, tasks: Arc<dyn TaskManager>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Set the key-value store holding state, links and the lease.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set sync options.
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set the progress callback.
    pub fn progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Build the sync context.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MissingField` if a collaborator or the store is not set.
    pub fn build(self) -> Result<SyncContext> {
        let issues = self
            .issues
            .ok_or(SyncError::MissingField { field: "issue_tracker" })?;
        let tasks = self
            .tasks
            .ok_or(SyncError::MissingField { field: "task_manager" })?;
        let store = self.store.ok_or(SyncError::MissingField { field: "store" })?;

        Ok(SyncContext {
            issues,
            tasks,
            state_store: SyncStateStore::new(Arc::clone(&store)),
            links: LinkStore::new(Arc::clone(&store)),
            store,
            options: self.options.unwrap_or_default(),
            progress: self.progress,
        })
    }
}

/// Context for sync operations.
pub struct SyncContext {
    issues: Arc<dyn IssueTracker>,
    tasks: Arc<dyn TaskManager>,
    store: Arc<dyn KvStore>,
    state_store: SyncStateStore,
    links: LinkStore,
    options: SyncOptions,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncContext {
    /// Create a new builder.
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::new()
    }

    /// Get a reference to the options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Check if dry run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn on_progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_deref()
    }

    /// The persisted state, or defaults if none was saved.
    pub async fn state(&self) -> Result<SyncState> {
        Ok(self.state_store.load().await?)
    }

    pub async fn health(&self) -> Result<SyncHealth> {
        Ok(self
            .state()
            .await?
            .health(self.options.health_failure_threshold))
    }

    /// Ask the next cycle to backfill `scope`.
    ///
    /// Requests accumulate until a backfill completes them; asking for
    /// everything supersedes any group list.
    pub async fn request_backfill(&self, scope: BackfillScope) -> Result<SyncState> {
        let lease = self.acquire_lease().await?;
        let result = async {
            let mut state = self.state_store.load().await?;
            let force = &mut state.force_backfill;
            let everything = force.enabled && force.group_ids.is_empty();
            match scope {
                BackfillScope::Groups(ids) if !ids.is_empty() => {
                    if !everything {
                        for id in ids {
                            if !force.group_ids.contains(&id) {
                                force.group_ids.push(id);
                            }
                        }
                    }
                }
                _ => force.group_ids.clear(),
            }
            force.enabled = true;
            self.state_store.save(&state).await?;
            Ok(state)
        }
        .await;
        self.release_lease(&lease).await;
        result
    }

    /// Restore the default state. Known groups are forgotten, so the next
    /// cycle records a fresh baseline.
    pub async fn reset_state(&self) -> Result<SyncState> {
        let lease = self.acquire_lease().await?;
        let result = self.state_store.reset().await.map_err(SyncError::from);
        self.release_lease(&lease).await;
        result
    }

    // ---------- Lease ----------

    async fn acquire_lease(&self) -> Result<Lease> {
        let holder = uuid::Uuid::new_v4().to_string();
        let acquired = self
            .store
            .put_if_absent(SYNC_LEASE_KEY, &holder, Some(self.options.lease_ttl))
            .await?;
        if !acquired {
            return Err(SyncError::LeaseHeld);
        }
        tracing::debug!(holder = %holder, "Acquired sync lease");
        Ok(Lease {
            holder,
            renewed_at: Instant::now(),
        })
    }

    /// Restart the lease TTL once half of it has passed, or always when
    /// `force` is set. A dry run holds no lease and passes `None`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LeaseLost` if the lease expired or changed hands.
    async fn keep_lease(&self, lease: Option<&mut Lease>, force: bool) -> Result<()> {
        let Some(lease) = lease else {
            return Ok(());
        };
        let ttl = self.options.lease_ttl;
        if !force && lease.renewed_at.elapsed() < ttl / 2 {
            return Ok(());
        }
        if !self.store.renew(SYNC_LEASE_KEY, &lease.holder, Some(ttl)).await? {
            tracing::error!(holder = %lease.holder, "Sync lease lost mid-cycle");
            return Err(SyncError::LeaseLost);
        }
        lease.renewed_at = Instant::now();
        tracing::debug!(holder = %lease.holder, "Renewed sync lease");
        Ok(())
    }

    /// Release the lease if we still hold it. An expired lease may have been
    /// taken over, in which case it is left alone.
    async fn release_lease(&self, lease: &Lease) {
        match self.store.get(SYNC_LEASE_KEY).await {
            Ok(Some(current)) if current == lease.holder => {
                if let Err(e) = self.store.delete(SYNC_LEASE_KEY).await {
                    tracing::warn!(error = %short_error_message(&e), "Failed to release sync lease");
                }
            }
            Ok(_) => tracing::warn!("Sync lease expired before release"),
            Err(e) => tracing::warn!(error = %short_error_message(&e), "Failed to read sync lease"),
        }
    }

    // ---------- Cycle ----------

    /// Run one sync cycle.
    ///
    /// Entity-level failures are reported in the returned [`CycleReport`].
    /// An `Err` means the cycle could not run at all; the failure is
    /// recorded and the previous cursors are kept.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        if self.options.dry_run {
            let mut state = self.state_store.load().await?;
            return self.execute(&mut state, None).await;
        }

        let mut lease = self.acquire_lease().await?;
        let result = self.run_cycle_leased(&mut lease).await;
        self.release_lease(&lease).await;
        result
    }

    async fn run_cycle_leased(&self, lease: &mut Lease) -> Result<CycleReport> {
        let stored = self.state_store.load().await?;
        let mut state = stored.clone();

        match self.execute(&mut state, Some(lease)).await {
            Ok(report) => {
                self.state_store.save(&state).await?;
                Ok(report)
            }
            // The state now belongs to whoever took the lease.
            Err(SyncError::LeaseLost) => Err(SyncError::LeaseLost),
            Err(e) => {
                tracing::error!(error = %e, "Sync cycle failed");
                let mut failed = stored;
                failed.error_tracking.record(ErrorInfo::new(
                    "sync_cycle",
                    short_error_message(&e),
                    e.status_code(),
                ));
                failed.error_tracking.record_failed_cycle();
                if let Err(save_err) = self.state_store.save(&failed).await {
                    tracing::warn!(error = %short_error_message(&save_err), "Failed to record cycle failure");
                }
                Err(e)
            }
        }
    }

    /// Run the cycle phases against `state`. The lease, when held, is
    /// renewed between entities and checked once more before returning.
    async fn execute(&self, state: &mut SyncState, mut lease: Option<&mut Lease>) -> Result<CycleReport> {
        let cycle_start = Utc::now();
        let options = &self.options;
        let on_progress = self.on_progress();
        let issues = self.issues.as_ref();
        let tasks = self.tasks.as_ref();

        let mut report = CycleReport {
            poll_count: state.poll_count + 1,
            dry_run: options.dry_run,
            ..Default::default()
        };
        emit(
            on_progress,
            SyncProgress::CycleStarted {
                poll_count: report.poll_count,
                dry_run: options.dry_run,
            },
        );
        tracing::info!(poll_count = report.poll_count, dry_run = options.dry_run, "Starting sync cycle");

        let projects = tasks.list_projects().await?;
        let hierarchy = GroupHierarchy::build(&projects, &options.org_mapping);
        if hierarchy.is_empty() {
            return Err(SyncError::Configuration(
                "no organization groups found; check org_mapping".to_string(),
            ));
        }
        emit(
            on_progress,
            SyncProgress::HierarchyBuilt {
                parent_groups: hierarchy.parent_groups.len(),
                sub_groups: hierarchy.sub_groups.len(),
            },
        );

        let mut cache = SectionMilestoneCache::new();
        cache
            .prime_sections(tasks, hierarchy.sub_groups.keys().map(String::as_str))
            .await;

        // ---------- Baseline / backfill ----------

        let current = hierarchy.sub_group_ids();
        if state.is_first_cycle() && !state.force_backfill.enabled {
            report.baseline_groups = current.len();
            state.known_group_ids.extend(current.iter().cloned());
            emit(
                on_progress,
                SyncProgress::BaselineRecorded {
                    groups: current.len(),
                },
            );
        } else {
            let targets = backfill_targets(state, &current);
            if !targets.is_empty() {
                let backfill = Backfill::new(
                    issues,
                    tasks,
                    &self.links,
                    &hierarchy,
                    &mut cache,
                    options,
                    on_progress,
                )
                .run(&targets)
                .await;

                state
                    .known_group_ids
                    .extend(backfill.completed_group_ids.iter().cloned());
                state.force_backfill = ForceBackfill {
                    enabled: !backfill.incomplete_group_ids.is_empty(),
                    group_ids: backfill.incomplete_group_ids.clone(),
                };
                report
                    .failures
                    .extend(backfill.errors.iter().map(|message| CycleFailure {
                        operation: "backfill".to_string(),
                        message: message.clone(),
                        code: None,
                    }));
                report.backfill = Some(backfill);
            }
        }
        self.keep_lease(lease.as_deref_mut(), false).await?;

        let mut reconciler = Reconciler::new(issues, tasks, &self.links, &mut cache, options);

        // ---------- Issues ----------

        let poll = poll_issues(issues, &hierarchy, state.source_cursor, on_progress).await;
        for issue in &poll.issues {
            self.keep_lease(lease.as_deref_mut(), false).await?;
            let outcome = reconciler.reconcile_issue(issue).await;
            self.record_outcome(EntityKind::Issue, &issue.url, &outcome, &mut report.issues, &mut report.failures);
        }
        let issues_clean = poll.all_repos_polled() && report.issues.errors == 0;
        report.failures.extend(poll.failures);
        if issues_clean {
            state.source_cursor = Some(cycle_start);
            report.source_cursor_advanced = true;
        }
        self.keep_lease(lease.as_deref_mut(), false).await?;

        // ---------- Tasks ----------

        match poll_tasks(tasks, &hierarchy, &state.target_sync_token, on_progress).await {
            Ok(delta) => {
                report.full_sync = delta.full_sync;
                for task in &delta.items {
                    self.keep_lease(lease.as_deref_mut(), false).await?;
                    let outcome = reconciler.reconcile_task(task).await;
                    self.record_outcome(EntityKind::Task, &task.id, &outcome, &mut report.tasks, &mut report.failures);
                }
                if report.tasks.errors == 0 && !delta.sync_token.is_empty() {
                    report.sync_token_advanced = delta.sync_token != state.target_sync_token;
                    state.target_sync_token = delta.sync_token;
                }
            }
            Err(e) => {
                tracing::warn!(error = %short_error_message(&e), "Failed to poll tasks");
                report.failures.push(failure("poll_tasks", &e));
            }
        }
        self.keep_lease(lease.as_deref_mut(), false).await?;

        // ---------- Completions ----------

        match poll_completed(tasks, &hierarchy, state.last_completed_cursor, on_progress).await {
            Ok(completed) => {
                let cursor = if completed.is_empty() {
                    Some(cycle_start)
                } else {
                    self.process_completions(
                        &reconciler,
                        &completed,
                        state.last_completed_cursor,
                        &mut report,
                        lease.as_deref_mut(),
                    )
                    .await?
                };
                if cursor != state.last_completed_cursor {
                    state.last_completed_cursor = cursor;
                    report.completed_cursor_advanced = true;
                }
            }
            Err(e) => {
                tracing::warn!(error = %short_error_message(&e), "Failed to poll completed tasks");
                report.failures.push(failure("poll_completed", &e));
            }
        }

        // ---------- Bookkeeping ----------

        // The caller saves right after; make sure the state is still ours.
        self.keep_lease(lease, true).await?;

        state.poll_count = report.poll_count;
        state.last_poll_time = Some(cycle_start);
        if report.is_clean() {
            state.error_tracking.record_success(Utc::now());
        } else {
            for failure in &report.failures {
                state.error_tracking.record(ErrorInfo {
                    timestamp: Utc::now(),
                    operation: failure.operation.clone(),
                    message: failure.message.clone(),
                    code: failure.code,
                });
            }
            state.error_tracking.record_failed_cycle();
        }

        let errors = report.failures.len();
        emit(
            on_progress,
            SyncProgress::CycleComplete {
                issues_changed: report.issues.changed(),
                tasks_changed: report.tasks.changed(),
                completions_closed: report.completions.outcomes.completed,
                errors,
            },
        );
        tracing::info!(
            issues = report.issues.total(),
            issues_changed = report.issues.changed(),
            tasks = report.tasks.total(),
            tasks_changed = report.tasks.changed(),
            completions = report.completions.processed,
            errors,
            "Sync cycle complete"
        );

        Ok(report)
    }

    /// Close issues behind completed tasks, oldest first.
    ///
    /// Returns the new completion cursor: the timestamp of the last task
    /// processed before the first failure. Tasks that were never linked are
    /// skipped and do not hold the cursor back.
    async fn process_completions(
        &self,
        reconciler: &Reconciler<'_>,
        completed: &[CompletedTask],
        cursor: Option<DateTime<Utc>>,
        report: &mut CycleReport,
        mut lease: Option<&mut Lease>,
    ) -> Result<Option<DateTime<Utc>>> {
        let resolver = MappingResolver::new(
            &self.links,
            self.tasks.as_ref(),
            &self.options.issue_web_url,
            self.options.dry_run,
        );
        let mut cursor = cursor;
        let mut blocked = false;
        report.completions.processed = completed.len();

        for item in completed {
            self.keep_lease(lease.as_deref_mut(), false).await?;
            let outcome = match resolver.resolve(item).await {
                Resolution::Linked(link, via) => {
                    tracing::debug!(task_id = %item.task_id, via = ?via, issue_url = %link.url, "Resolved completed task");
                    reconciler.reconcile_completion(&item.task_id, &link).await
                }
                Resolution::Unlinked => ReconcileOutcome::Skipped {
                    reason: SkipReason::NotLinked,
                },
                Resolution::Unresolved => {
                    blocked = true;
                    report.completions.unresolved += 1;
                    report.failures.push(CycleFailure {
                        operation: format!("resolve_completed:{}", item.task_id),
                        message: "no issue link found".to_string(),
                        code: None,
                    });
                    emit(
                        self.on_progress(),
                        SyncProgress::CompletionUnresolved {
                            task_id: item.task_id.clone(),
                        },
                    );
                    continue;
                }
            };
            self.record_outcome(
                EntityKind::CompletedTask,
                &item.task_id,
                &outcome,
                &mut report.completions.outcomes,
                &mut report.failures,
            );

            if outcome.is_error() {
                blocked = true;
            } else if !blocked {
                cursor = Some(item.completed_at);
            }
        }

        Ok(cursor)
    }

    fn record_outcome(
        &self,
        kind: EntityKind,
        id: &str,
        outcome: &ReconcileOutcome,
        tally: &mut OutcomeTally,
        failures: &mut Vec<CycleFailure>,
    ) {
        tally.record(outcome);
        match outcome {
            ReconcileOutcome::Error { message } => {
                tracing::warn!(kind = kind.as_str(), id, error = %message, "Reconciliation failed");
                failures.push(CycleFailure {
                    operation: format!("{}:{id}", kind.as_str()),
                    message: message.clone(),
                    code: None,
                });
            }
            ReconcileOutcome::Unchanged => {}
            other => tracing::debug!(kind = kind.as_str(), id, outcome = %other, "Reconciled"),
        }
        emit(
            self.on_progress(),
            SyncProgress::EntityReconciled {
                kind,
                id: id.to_string(),
                outcome: outcome.to_string(),
            },
        );
    }
}

fn failure(operation: &str, e: &ApiError) -> CycleFailure {
    CycleFailure {
        operation: operation.to_string(),
        message: short_error_message(e),
        code: e.status_code(),
    }
}

/// New groups plus requested ones, limited to groups that still exist.
fn backfill_targets(state: &SyncState, current: &BTreeSet<GroupId>) -> Vec<GroupId> {
    let mut targets: BTreeSet<GroupId> = current
        .difference(&state.known_group_ids)
        .cloned()
        .collect();

    let force = &state.force_backfill;
    if force.enabled {
        if force.group_ids.is_empty() {
            targets.extend(current.iter().cloned());
        } else {
            targets.extend(
                force
                    .group_ids
                    .iter()
                    .filter(|id| current.contains(*id))
                    .cloned(),
            );
        }
    }

    targets.into_iter().collect()
}
