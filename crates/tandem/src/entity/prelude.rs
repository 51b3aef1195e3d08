//! Common re-exports for convenient entity usage.

pub use super::kv_entry::{
    ActiveModel as KvEntryActiveModel, Column as KvEntryColumn, Entity as KvEntry,
    Model as KvEntryModel,
};
