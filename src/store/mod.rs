//! Durable persistence for topics.
//!
//! [`ObjectStore`] is an append-only store of objects grouped by type, with
//! timestamp-ordered seeks and per-type compaction. [`TopicJournal`] uses it
//! to persist a topic's snapshots and diffs and rebuild the topic's cache
//! on restart. Topics keep serving from memory when persistence fails.

mod journal;
mod objects;

pub use journal::TopicJournal;
pub use objects::{ObjectStore, StoreConfig, StoredObject};
