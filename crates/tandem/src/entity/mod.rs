//! SeaORM entity definitions for the tandem database schema.

pub mod kv_entry;
pub mod prelude;
