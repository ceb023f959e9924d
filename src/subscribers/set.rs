//! Registry of live subscribers for one topic.

use super::types::{SubscriberKey, SubscriberRef};
use std::collections::HashMap;

/// Unordered set of subscriber handles, keyed by identity.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: HashMap<SubscriberKey, SubscriberRef>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns false if it was already present.
    pub fn insert(&mut self, subscriber: SubscriberRef) -> bool {
        let key = SubscriberKey::of(&subscriber);
        if self.subscribers.contains_key(&key) {
            return false;
        }
        self.subscribers.insert(key, subscriber);
        true
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn remove(&mut self, subscriber: &SubscriberRef) -> bool {
        self.subscribers.remove(&SubscriberKey::of(subscriber)).is_some()
    }

    pub fn contains(&self, subscriber: &SubscriberRef) -> bool {
        self.subscribers.contains_key(&SubscriberKey::of(subscriber))
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubscriberKey, &SubscriberRef)> {
        self.subscribers.iter().map(|(k, s)| (*k, s))
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}
