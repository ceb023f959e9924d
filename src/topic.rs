//! Direct fan-out on the calling thread.

use crate::cache::FullDiffCache;
use crate::publisher::Publisher;
use crate::store::TopicJournal;
use crate::subscribers::{SubscriberRef, SubscriberSet};
use crate::types::{Message, Ts};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct TopicState {
    cache: FullDiffCache,
    subscribers: SubscriberSet,
    /// Subscribers as of the last membership change.
    members: Option<Arc<Vec<SubscriberRef>>>,
}

impl TopicState {
    fn members(&mut self) -> Arc<Vec<SubscriberRef>> {
        let subscribers = &self.subscribers;
        let members = self
            .members
            .get_or_insert_with(|| Arc::new(subscribers.iter().map(|(_, s)| Arc::clone(s)).collect()));
        Arc::clone(members)
    }
}

/// Simple broadcaster.
///
/// Same contract as [`Spreader`](crate::Spreader), but delivery runs on the
/// caller's thread and walks every subscriber in turn. Cheaper when
/// subscribers are few or fast; one slow subscriber delays everyone on this
/// topic.
///
/// Deliveries are serialized by a lock separate from the cache and the
/// subscriber set, so a subscriber may unsubscribe from inside `send`. It
/// must not publish or subscribe on the same topic from there.
pub struct Topic {
    name: String,
    state: Mutex<TopicState>,
    delivery: Mutex<()>,
    journal: Option<TopicJournal>,
    closed: AtomicBool,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, FullDiffCache::new(), None)
    }

    /// Create a topic seeded with `cache`, optionally persisting every
    /// publish through `journal`.
    pub fn with_options(
        name: impl Into<String>,
        cache: FullDiffCache,
        journal: Option<TopicJournal>,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TopicState {
                cache,
                subscribers: SubscriberSet::new(),
                members: None,
            }),
            delivery: Mutex::new(()),
            journal,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(topic = %self.name, "topic closed, operation ignored");
            return true;
        }
        false
    }

    fn deliver(&self, subscriber: &SubscriberRef, msg: &Arc<Message>) {
        if catch_unwind(AssertUnwindSafe(|| subscriber.send(msg))).is_err() {
            tracing::warn!(topic = %self.name, ts = %msg.ts, "subscriber panicked during delivery");
        }
    }
}

impl Publisher for Topic {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, subscriber: SubscriberRef, from: Ts) {
        if self.is_closed() {
            return;
        }
        let _delivery = self.delivery.lock();
        let catch_up = {
            let mut state = self.state.lock();
            if state.subscribers.contains(&subscriber) {
                tracing::debug!(topic = %self.name, "already subscribed");
                return;
            }
            let msgs = state.cache.find(from);
            state.subscribers.insert(Arc::clone(&subscriber));
            state.members = None;
            msgs
        };

        for msg in catch_up.iter().flatten() {
            self.deliver(&subscriber, msg);
        }
    }

    fn unsubscribe(&self, subscriber: &SubscriberRef) -> bool {
        let mut state = self.state.lock();
        if state.subscribers.remove(subscriber) {
            state.members = None;
        }
        state.subscribers.is_empty()
    }

    fn publish(&self, msg: Arc<Message>) {
        if self.is_closed() {
            return;
        }
        let _delivery = self.delivery.lock();
        let members = {
            let mut state = self.state.lock();
            state.cache.add(Arc::clone(&msg));
            state.members()
        };

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&msg) {
                tracing::warn!(topic = %self.name, ts = %msg.ts, error = %e, "failed to persist message");
            }
        }

        for subscriber in members.iter() {
            self.deliver(subscriber, &msg);
        }
    }

    fn replay(&self) -> Option<Vec<Arc<Message>>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.state.lock().cache.reset_sequence()
    }

    fn compact(&self) {
        if self.is_closed() {
            return;
        }
        self.state.lock().cache.compact();
    }

    fn wait(&self) {
        // Operations complete before returning; just let in-flight ones finish.
        drop(self.delivery.lock());
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        state.subscribers.clear();
        state.members = None;
        tracing::debug!(topic = %self.name, "topic closed");
    }
}
