//! Persisted sync state and the health report derived from it.
//!
//! The state is one JSON record stored under [`SYNC_STATE_KEY`]. Every field
//! has a default and unknown fields are ignored, so records written by an
//! older or newer build always load.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::{ApiError, GroupId, short_error_message};
use crate::store::{self, KvStore, SYNC_STATE_KEY};

/// Size of the recent-error ring.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Sync token meaning "from the beginning".
pub const FULL_SYNC_TOKEN: &str = "*";

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl ErrorInfo {
    pub fn new(operation: impl Into<String>, message: impl Into<String>, code: Option<u16>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            message: message.into(),
            code,
        }
    }

    /// Build from an API error, keeping only its first line.
    pub fn from_api_error(operation: impl Into<String>, err: &ApiError) -> Self {
        Self::new(operation, short_error_message(err), err.status_code())
    }
}

/// Rolling error history across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorTracking {
    pub last_error: Option<ErrorInfo>,
    /// Newest first, at most [`MAX_RECENT_ERRORS`].
    pub recent_errors: VecDeque<ErrorInfo>,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub last_successful_sync: Option<DateTime<Utc>>,
}

impl ErrorTracking {
    /// Record one error without touching the failure streak.
    pub fn record(&mut self, error: ErrorInfo) {
        self.error_count += 1;
        self.recent_errors.push_front(error.clone());
        self.recent_errors.truncate(MAX_RECENT_ERRORS);
        self.last_error = Some(error);
    }

    /// Count a cycle that failed or finished with errors.
    pub fn record_failed_cycle(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Count a cycle that finished with zero errors.
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_successful_sync = Some(at);
    }
}

/// Groups to backfill on the next cycle.
///
/// `enabled` with an empty id list means every tracked sub-group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForceBackfill {
    pub enabled: bool,
    pub group_ids: Vec<GroupId>,
}

/// Cursor and bookkeeping record, persisted after every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncState {
    /// Issues updated at or after this time are polled; `None` scans all.
    pub source_cursor: Option<DateTime<Utc>>,
    /// Task delta token; [`FULL_SYNC_TOKEN`] requests a full snapshot.
    pub target_sync_token: String,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_completed_cursor: Option<DateTime<Utc>>,
    pub poll_count: u64,
    pub known_group_ids: BTreeSet<GroupId>,
    pub force_backfill: ForceBackfill,
    pub error_tracking: ErrorTracking,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            source_cursor: None,
            target_sync_token: FULL_SYNC_TOKEN.to_string(),
            last_poll_time: None,
            last_completed_cursor: None,
            poll_count: 0,
            known_group_ids: BTreeSet::new(),
            force_backfill: ForceBackfill::default(),
            error_tracking: ErrorTracking::default(),
        }
    }
}

impl SyncState {
    /// No cycle has ever completed: no cursor and no known groups.
    pub fn is_first_cycle(&self) -> bool {
        self.source_cursor.is_none() && self.known_group_ids.is_empty()
    }

    /// Health as of this state.
    pub fn health(&self, failure_threshold: u32) -> SyncHealth {
        let tracking = &self.error_tracking;
        SyncHealth {
            status: HealthStatus::from_failures(tracking.consecutive_failures, failure_threshold),
            consecutive_failures: tracking.consecutive_failures,
            error_count: tracking.error_count,
            last_successful_sync: tracking.last_successful_sync,
            last_poll_time: self.last_poll_time,
            poll_count: self.poll_count,
            last_error: tracking.last_error.clone(),
            recent_errors: tracking.recent_errors.iter().cloned().collect(),
        }
    }
}

/// Coarse health derived from the failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

impl HealthStatus {
    pub fn from_failures(consecutive_failures: u32, threshold: u32) -> Self {
        if consecutive_failures == 0 {
            HealthStatus::Healthy
        } else if consecutive_failures < threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Error
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Error => "error",
        }
    }
}

/// Health report exposed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHealth {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub error_count: u64,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub poll_count: u64,
    pub last_error: Option<ErrorInfo>,
    pub recent_errors: Vec<ErrorInfo>,
}

/// Loads and saves the [`SyncState`] record.
#[derive(Clone)]
pub struct SyncStateStore {
    store: Arc<dyn KvStore>,
}

impl SyncStateStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Load the state, or defaults when none has been saved.
    pub async fn load(&self) -> store::Result<SyncState> {
        Ok(store::get_json(self.store.as_ref(), SYNC_STATE_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, state: &SyncState) -> store::Result<()> {
        store::put_json(self.store.as_ref(), SYNC_STATE_KEY, state, None).await
    }

    /// Replace the state with defaults.
    pub async fn reset(&self) -> store::Result<SyncState> {
        let state = SyncState::default();
        self.save(&state).await?;
        Ok(state)
    }
}
