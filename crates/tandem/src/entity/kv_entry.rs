//! KvEntry entity - durable key/value records with optional expiry.
//!
//! Holds the persisted sync state, the bidirectional task/issue id maps
//! and the cycle lease.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// KvEntry model - one JSON-encoded value per key.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "kv_entries")]
pub struct Model {
    /// Namespaced key, e.g. `task:123` or `sync:state`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// JSON-encoded value.
    #[sea_orm(column_type = "Text")]
    pub value: String,

    /// When the entry stops being visible; `None` never expires.
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// When this entry was last written.
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the entry has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTimeWithTimeZone) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
