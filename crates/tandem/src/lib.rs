//! Tandem - keeps a GitHub issue tracker and a Todoist workspace in step.
//!
//! Todoist projects stand in for organizations, their sub-projects for
//! repositories, and sections for milestones. A polling cycle carries
//! creation, titles, open/closed state and milestones across in both
//! directions, and remembers how far it got in a small key-value store.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - Database backends for the key-value store.
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tandem::{connect_and_migrate, DbKvStore, SyncContext};
//!
//! let db = connect_and_migrate("sqlite://tandem.db?mode=rwc").await?;
//! let ctx = SyncContext::builder()
//!     .issue_tracker(Arc::new(github))
//!     .task_manager(Arc::new(todoist))
//!     .store(Arc::new(DbKvStore::new(db)))
//!     .build()?;
//!
//! let report = ctx.run_cycle().await?;
//! ```

pub mod db;
pub mod entity;
pub mod github;
pub mod http;
pub mod platform;
pub mod retry;
pub mod store;
pub mod sync;
pub mod todoist;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use platform::{ApiError, ApiRateLimiter, IssueTracker, TaskManager, rate_limits};
pub use store::{DbKvStore, KvStore, MemoryKvStore, StoreError};
pub use sync::{SyncContext, SyncError, SyncOptions};
