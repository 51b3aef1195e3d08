//! Durable key/value storage for sync state, id mappings and the cycle lease.
//!
//! Values are JSON text. Entries may carry a time-to-live; an expired entry
//! behaves exactly like a missing one.
//!
//! Keys used by the engine:
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `sync:state` | [`crate::sync::SyncState`] | none |
//! | `sync:lease` | lease holder id | cycle lease TTL |
//! | `task:<id>` | issue URL | 365 days |
//! | `issue:<url>` | task id | 365 days |

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::entity::kv_entry::{ActiveModel, Column, Entity as KvEntry};

/// Key holding the persisted [`crate::sync::SyncState`].
pub const SYNC_STATE_KEY: &str = "sync:state";

/// Key holding the cycle lease.
pub const SYNC_LEASE_KEY: &str = "sync:lease";

/// Lifetime of task/issue id mappings.
pub const MAPPING_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Key mapping a task id to its issue URL.
pub fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Key mapping an issue URL to its task id.
pub fn issue_key(issue_url: &str) -> String {
    format!("issue:{issue_url}")
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The TTL cannot be represented as a timestamp.
    #[error("TTL out of range: {0:?}")]
    InvalidTtl(Duration),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Key/value persistence used by the sync engine.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any existing one.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Write only if no live entry exists. Returns whether the write happened.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Restart the TTL of a live entry that still holds `value`. Returns
    /// `false` if the entry expired, was deleted or now holds another value.
    async fn renew(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
}

fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
    ttl.map(|ttl| {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(StoreError::InvalidTtl(ttl))
    })
    .transpose()
}

/// Read and decode a JSON value.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.put(key, &raw, ttl).await
}

// ---------- In-memory store ----------

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store, for tests and single-shot runs without a database.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        // A panic mid-write cannot leave a half-written entry behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry(Utc::now(), ttl)?;
        self.lock().insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == value => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------- Database store ----------

/// Store backed by the `kv_entries` table.
#[derive(Debug, Clone)]
pub struct DbKvStore {
    db: DatabaseConnection,
}

impl DbKvStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Underlying connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Delete every expired entry. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = KvEntry::delete_many()
            .filter(Column::ExpiresAt.lte(Utc::now().fixed_offset()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    fn active_model(
        key: &str,
        value: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ActiveModel {
        ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            expires_at: Set(expires_at.map(|at| at.fixed_offset())),
            updated_at: Set(now.fixed_offset()),
        }
    }
}

#[async_trait]
impl KvStore for DbKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(entry) = KvEntry::find_by_id(key.to_string()).one(&self.db).await? else {
            return Ok(None);
        };

        if entry.is_expired_at(Utc::now().fixed_offset()) {
            KvEntry::delete_by_id(key.to_string())
                .exec(&self.db)
                .await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now();
        let model = Self::active_model(key, value, now, expiry(now, ttl)?);

        KvEntry::insert(model)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([Column::Value, Column::ExpiresAt, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        KvEntry::delete_by_id(key.to_string())
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Utc::now();

        // An expired holder no longer counts; clear it so the insert can win.
        KvEntry::delete_many()
            .filter(Column::Key.eq(key))
            .filter(Column::ExpiresAt.lte(now.fixed_offset()))
            .exec(&self.db)
            .await?;

        let inserted = KvEntry::insert(Self::active_model(key, value, now, expiry(now, ttl)?))
            .on_conflict(OnConflict::column(Column::Key).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await?;

        Ok(inserted > 0)
    }

    async fn renew(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl)?.map(|at| at.fixed_offset());

        // Single conditional update: a lapsed holder cannot extend its successor.
        let result = KvEntry::update_many()
            .col_expr(Column::ExpiresAt, Expr::value(expires_at))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Key.eq(key))
            .filter(Column::Value.eq(value))
            .filter(
                Condition::any()
                    .add(Column::ExpiresAt.is_null())
                    .add(Column::ExpiresAt.gt(now.fixed_offset())),
            )
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}
