//! Per-topic update cache.
//!
//! A topic keeps its latest full snapshot and the diffs published since,
//! so a joining subscriber can be brought up to date from any cursor.

mod full_diff;

pub use full_diff::FullDiffCache;
