//! Persists one topic's messages into the object store.

use super::objects::ObjectStore;
use crate::cache::FullDiffCache;
use crate::error::Result;
use crate::types::{Message, UpdateType};
use std::sync::Arc;

/// Journal of a topic's full snapshots and diffs.
///
/// Snapshots go to type `"<topic>/full"`, diffs to `"<topic>/diff"`, both
/// keyed by the message timestamp.
#[derive(Clone)]
pub struct TopicJournal {
    store: Arc<ObjectStore>,
    topic: String,
    full_type: String,
    diff_type: String,
}

impl TopicJournal {
    pub fn new(store: Arc<ObjectStore>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            full_type: format!("{}/full", topic),
            diff_type: format!("{}/diff", topic),
            store,
            topic,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a published message.
    pub fn append(&self, msg: &Message) -> Result<()> {
        let typ = match msg.update_type {
            UpdateType::Full => &self.full_type,
            UpdateType::Diff => &self.diff_type,
        };
        let encoded = rmp_serde::to_vec(msg)?;
        self.store.insert(typ, None, msg.ts, &encoded)
    }

    /// Rebuild the topic's cache: the newest snapshot plus the diffs after it.
    ///
    /// Without a snapshot, every stored diff is loaded so the history is
    /// complete once a snapshot arrives.
    pub fn load(&self) -> Result<FullDiffCache> {
        let full = match self.store.find_latest(&self.full_type) {
            Ok(obj) => Some(Arc::new(rmp_serde::from_slice::<Message>(&obj.content)?)),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let from = full.as_ref().map(|f| f.ts);
        let mut cache = FullDiffCache::new();
        if let Some(full) = full {
            cache.add(full);
        }
        for obj in self.store.seek(&self.diff_type, from)? {
            let msg: Message = rmp_serde::from_slice(&obj.content)?;
            cache.add(Arc::new(msg));
        }
        cache.compact();

        tracing::debug!(
            topic = %self.topic,
            full = ?cache.full().map(|f| f.ts),
            diffs = cache.diffs().len(),
            "restored topic from journal"
        );
        Ok(cache)
    }

    /// Drop everything the newest snapshot supersedes: older snapshots and
    /// diffs at or before it. Returns the number of objects removed.
    pub fn compact(&self) -> Result<usize> {
        let mut removed = self.store.compact(&self.full_type)?;

        match self.store.find_latest(&self.full_type) {
            Ok(obj) => removed += self.store.remove_through(&self.diff_type, obj.ts)?,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        Ok(removed)
    }

    /// Delete the whole journal.
    pub fn remove(&self) -> Result<()> {
        self.store.remove(&self.full_type)?;
        self.store.remove(&self.diff_type)
    }
}
