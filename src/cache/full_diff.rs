//! Snapshot plus diff history for one topic.

use crate::types::{Message, Ts, UpdateType};
use std::collections::HashSet;
use std::sync::Arc;

/// Holds a topic's latest full snapshot and the diffs published around it.
///
/// `add` is permissive: diffs are appended in arrival order and diffs at or
/// below the snapshot timestamp are kept until read time. `find` filters,
/// sorts and deduplicates on the way out, and `compact` restores the sorted,
/// duplicate-free layout in place.
#[derive(Clone, Debug, Default)]
pub struct FullDiffCache {
    /// Most recent full snapshot.
    full: Option<Arc<Message>>,

    /// Diffs in arrival order.
    diffs: Vec<Arc<Message>>,

    /// Timestamps present in `diffs`.
    diff_ts: HashSet<Ts>,
}

impl FullDiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from raw parts without any filtering.
    ///
    /// `diffs` may be unsorted or contain duplicates; run `compact` to
    /// normalize them.
    pub fn from_parts(full: Option<Arc<Message>>, diffs: Vec<Arc<Message>>) -> Self {
        let diff_ts = diffs.iter().map(|d| d.ts).collect();
        Self { full, diffs, diff_ts }
    }

    /// Absorb one published message.
    pub fn add(&mut self, msg: Arc<Message>) {
        match msg.update_type {
            UpdateType::Full => {
                self.full = Some(msg);
            }
            UpdateType::Diff => {
                if self.full.as_ref().is_some_and(|f| f.ts == msg.ts) {
                    return;
                }
                if !self.diff_ts.insert(msg.ts) {
                    return;
                }
                self.diffs.push(msg);
            }
        }
    }

    /// Messages a subscriber that has seen state up to `from` needs, in
    /// application order.
    ///
    /// Returns `None` when no snapshot exists yet. A cursor below the
    /// snapshot or beyond the newest known timestamp gets the full reset
    /// sequence; any other cursor gets only the newer diffs.
    pub fn find(&self, from: Ts) -> Option<Vec<Arc<Message>>> {
        let full = self.full.as_ref()?;

        if from < full.ts || from > self.max_ts().unwrap_or(full.ts) {
            return self.reset_sequence();
        }

        Some(self.diffs_after(from))
    }

    /// The sequence a subscriber with no usable state receives: the snapshot
    /// followed by every diff newer than it.
    pub fn reset_sequence(&self) -> Option<Vec<Arc<Message>>> {
        let full = self.full.as_ref()?;

        let mut msgs = Vec::with_capacity(self.diffs.len() + 1);
        msgs.push(Arc::clone(full));
        msgs.extend(self.diffs_after(full.ts));
        Some(msgs)
    }

    /// Sort diffs by timestamp and collapse equal timestamps.
    ///
    /// Among diffs sharing a timestamp the one that arrived last is kept.
    /// Returns the number of diffs removed.
    pub fn compact(&mut self) -> usize {
        let before = self.diffs.len();
        let diffs = std::mem::take(&mut self.diffs);
        self.diffs = sorted_unique(diffs);
        self.diff_ts = self.diffs.iter().map(|d| d.ts).collect();
        before - self.diffs.len()
    }

    /// Greatest timestamp across the snapshot and all diffs.
    pub fn max_ts(&self) -> Option<Ts> {
        let full_ts = self.full.as_ref().map(|f| f.ts);
        let diff_ts = self.diffs.iter().map(|d| d.ts).max();
        full_ts.max(diff_ts)
    }

    pub fn full(&self) -> Option<&Arc<Message>> {
        self.full.as_ref()
    }

    /// Stored diffs in their current physical order.
    pub fn diffs(&self) -> &[Arc<Message>] {
        &self.diffs
    }

    /// Whether the cache holds neither a snapshot nor any diff.
    pub fn is_empty(&self) -> bool {
        self.full.is_none() && self.diffs.is_empty()
    }

    fn diffs_after(&self, from: Ts) -> Vec<Arc<Message>> {
        let newer = self
            .diffs
            .iter()
            .filter(|d| d.ts > from)
            .cloned()
            .collect();
        sorted_unique(newer)
    }
}

/// Stable sort by timestamp, then keep the last entry of each equal run.
fn sorted_unique(mut msgs: Vec<Arc<Message>>) -> Vec<Arc<Message>> {
    msgs.sort_by_key(|m| m.ts);

    let mut out: Vec<Arc<Message>> = Vec::with_capacity(msgs.len());
    for msg in msgs {
        match out.last_mut() {
            Some(last) if last.ts == msg.ts => *last = msg,
            _ => out.push(msg),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(ts: i64) -> Arc<Message> {
        Message::full("m", ts, Vec::new()).shared()
    }

    fn diff(ts: i64) -> Arc<Message> {
        Message::diff("m", ts, Vec::new()).shared()
    }

    fn ts_of(msgs: &[Arc<Message>]) -> Vec<i64> {
        msgs.iter().map(|m| m.ts.0).collect()
    }

    #[test]
    fn test_find_for_subscribe() {
        let cache = FullDiffCache::from_parts(
            Some(full(10)),
            vec![diff(10), diff(11), diff(12), diff(13)],
        );

        // Nothing seen yet: snapshot plus diffs
        let msgs = cache.find(Ts(0)).unwrap();
        assert_eq!(ts_of(&msgs), vec![10, 11, 12, 13]);
        assert!(msgs[0].is_full());

        let msgs = cache.find(Ts(9)).unwrap();
        assert_eq!(msgs.len(), 4);

        let msgs = cache.find(Ts(10)).unwrap();
        assert_eq!(ts_of(&msgs), vec![11, 12, 13]);

        let msgs = cache.find(Ts(11)).unwrap();
        assert_eq!(ts_of(&msgs), vec![12, 13]);

        assert!(cache.find(Ts(13)).unwrap().is_empty());

        // Cursor past anything we know about restarts from the snapshot
        let msgs = cache.find(Ts(14)).unwrap();
        assert_eq!(ts_of(&msgs), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_find_after_new_diff() {
        let mut cache = FullDiffCache::from_parts(
            Some(full(10)),
            vec![diff(10), diff(11), diff(12), diff(13)],
        );

        cache.add(diff(15));
        let msgs = cache.find(Ts(14)).unwrap();
        assert_eq!(ts_of(&msgs), vec![15]);
    }

    #[test]
    fn test_find_before_full() {
        let cache = FullDiffCache::from_parts(None, vec![diff(10), diff(11), diff(12), diff(13)]);
        assert!(cache.find(Ts(0)).is_none());
        assert!(cache.find(Ts(12)).is_none());
        assert!(cache.reset_sequence().is_none());
    }

    #[test]
    fn test_add() {
        let mut cache = FullDiffCache::from_parts(Some(full(10)), vec![diff(11), diff(12)]);

        cache.add(diff(15));
        assert_eq!(cache.diffs().len(), 3);

        // New snapshot leaves history alone
        cache.add(full(15));
        assert_eq!(cache.full().unwrap().ts, Ts(15));
        assert_eq!(cache.diffs().len(), 3);

        // Same ts as the snapshot is not stored
        cache.add(diff(15));
        assert_eq!(cache.diffs().len(), 3);

        cache.add(diff(14));
        assert_eq!(cache.diffs().len(), 4);

        cache.add(diff(14));
        assert_eq!(cache.diffs().len(), 4);
    }

    #[test]
    fn test_out_of_order_add_is_sorted_on_read() {
        let mut cache = FullDiffCache::new();
        cache.add(full(1));
        cache.add(diff(4));
        cache.add(diff(2));
        cache.add(diff(3));

        assert_eq!(ts_of(cache.diffs()), vec![4, 2, 3]);
        assert_eq!(ts_of(&cache.find(Ts(1)).unwrap()), vec![2, 3, 4]);
    }

    #[test]
    fn test_compact_removes_duplicates() {
        let mut cache = FullDiffCache::from_parts(
            Some(full(10)),
            vec![
                diff(10),
                diff(12),
                diff(12),
                diff(15),
                Message::diff("m", 15, Vec::new()).with_replay(true).shared(),
            ],
        );

        assert_eq!(cache.compact(), 2);
        assert_eq!(ts_of(cache.diffs()), vec![10, 12, 15]);
        // Last arrival wins
        assert!(cache.diffs()[2].replay);
    }

    #[test]
    fn test_compact_keeps_add_dedup_consistent() {
        let mut cache = FullDiffCache::from_parts(Some(full(1)), vec![diff(3), diff(3), diff(2)]);
        cache.compact();
        cache.add(diff(3));
        cache.add(diff(2));
        assert_eq!(ts_of(cache.diffs()), vec![2, 3]);
    }

    #[test]
    fn test_max_ts() {
        let mut cache = FullDiffCache::new();
        assert_eq!(cache.max_ts(), None);
        assert!(cache.is_empty());

        cache.add(diff(4));
        cache.add(full(3));
        assert_eq!(cache.max_ts(), Some(Ts(4)));
    }

    #[test]
    fn test_find_without_diffs() {
        let mut cache = FullDiffCache::new();
        cache.add(full(5));

        assert_eq!(ts_of(&cache.find(Ts(0)).unwrap()), vec![5]);
        assert!(cache.find(Ts(5)).unwrap().is_empty());
        assert_eq!(ts_of(&cache.find(Ts(6)).unwrap()), vec![5]);
    }
}
