//! Topic registry.

use crate::cache::FullDiffCache;
use crate::error::{BrokerError, Result};
use crate::publisher::Publisher;
use crate::spreader::{Spreader, SpreaderConfig};
use crate::store::{ObjectStore, StoreConfig, TopicJournal};
use crate::subscribers::SubscriberRef;
use crate::topic::Topic;
use crate::types::{Message, Ts};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

/// Fan-out strategy used for new topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Control thread plus delivery workers.
    #[default]
    Spreader,
    /// Direct iteration on the caller's thread.
    Topic,
}

/// Broker configuration.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Strategy for topics created from now on.
    pub strategy: Strategy,

    /// Delivery workers per spreader topic.
    pub workers: usize,

    /// Persist topics here when set.
    pub store: Option<StoreConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Spreader,
            workers: SpreaderConfig::default().workers,
            store: None,
        }
    }
}

/// One registered topic.
///
/// `gate` orders membership changes against teardown for this topic only.
/// It is reentrant so a subscriber may unsubscribe from inside `send`.
struct TopicEntry {
    publisher: Arc<dyn Publisher>,
    gate: ReentrantMutex<Cell<bool>>,
}

impl TopicEntry {
    fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            gate: ReentrantMutex::new(Cell::new(false)),
        }
    }
}

/// Maps topic names to their fan-out engines.
///
/// Topics are created on first publish or subscribe and torn down when
/// their last subscriber leaves. The registry lock only guards the map;
/// operations on a topic run after it is released, so a slow topic never
/// holds up another.
pub struct Broker {
    config: BrokerConfig,
    store: Option<Arc<ObjectStore>>,
    topics: RwLock<HashMap<String, Arc<TopicEntry>>>,
}

impl Broker {
    /// Create a broker, opening the configured store if any.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let store = match &config.store {
            Some(store_config) => Some(Arc::new(ObjectStore::open_or_create(store_config.clone())?)),
            None => None,
        };
        Ok(Self::with_store(config, store))
    }

    /// Create a broker around an already opened store.
    pub fn with_store(config: BrokerConfig, store: Option<Arc<ObjectStore>>) -> Self {
        Self {
            config,
            store,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Publish `msg` on `topic`, creating the topic if needed.
    ///
    /// The message must carry the same topic name it is published on.
    pub fn publish(&self, topic: &str, msg: Arc<Message>) -> Result<()> {
        if msg.topic != topic {
            return Err(BrokerError::TopicMismatch {
                expected: topic.to_string(),
                got: msg.topic.clone(),
            });
        }
        self.with_topic(topic, |t| t.publish(msg))
    }

    /// Subscribe to `topic` from cursor `from`, creating the topic if needed.
    pub fn subscribe(&self, topic: &str, subscriber: SubscriberRef, from: Ts) -> Result<()> {
        self.with_topic(topic, |t| t.subscribe(subscriber, from))
    }

    /// Unsubscribe from `topic`. Returns true when the topic had no
    /// subscribers left and was torn down (or never existed).
    ///
    /// Safe to call from inside [`Subscriber::send`](crate::Subscriber::send).
    pub fn unsubscribe(&self, topic: &str, subscriber: &SubscriberRef) -> bool {
        let Some(entry) = self.topics.read().get(topic).cloned() else {
            return true;
        };

        {
            let retired = entry.gate.lock();
            if retired.get() {
                return true;
            }
            if !entry.publisher.unsubscribe(subscriber) {
                return false;
            }
            retired.set(true);
        }

        self.forget(topic, &entry);
        entry.publisher.close();
        tracing::debug!(%topic, "topic torn down");
        true
    }

    /// The full-reset sequence of `topic`, if it exists and has a snapshot.
    pub fn replay(&self, topic: &str) -> Option<Vec<Arc<Message>>> {
        let entry = self.topics.read().get(topic).cloned()?;
        entry.publisher.replay()
    }

    /// Sort and deduplicate the diff history of `topic` and, with a store,
    /// drop persisted objects its newest snapshot supersedes.
    pub fn compact(&self, topic: &str) -> Result<()> {
        let entry = self.topics.read().get(topic).cloned();
        if let Some(entry) = entry {
            entry.publisher.compact();
        }
        if let Some(store) = &self.store {
            let removed = TopicJournal::new(Arc::clone(store), topic).compact()?;
            tracing::debug!(%topic, removed, "compacted journal");
        }
        Ok(())
    }

    /// Block until every topic has finished all admitted operations.
    pub fn wait(&self) {
        for entry in self.entries() {
            entry.publisher.wait();
        }
    }

    /// Names of live topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Close every topic.
    pub fn close(&self) {
        let topics: Vec<(String, Arc<TopicEntry>)> = self.topics.write().drain().collect();
        for (name, entry) in topics {
            entry.gate.lock().set(true);
            entry.publisher.close();
            tracing::debug!(topic = %name, "topic closed");
        }
    }

    fn entries(&self) -> Vec<Arc<TopicEntry>> {
        self.topics.read().values().cloned().collect()
    }

    /// Run `f` against the topic, creating it first if needed.
    ///
    /// `f` runs under the topic's gate but outside the registry lock. A
    /// topic retired between lookup and gate is dropped from the map and
    /// the lookup starts over.
    fn with_topic<R>(&self, name: &str, f: impl FnOnce(&dyn Publisher) -> R) -> Result<R> {
        loop {
            let entry = self.entry(name)?;
            let retired = entry.gate.lock();
            if retired.get() {
                drop(retired);
                self.forget(name, &entry);
                continue;
            }
            return Ok(f(entry.publisher.as_ref()));
        }
    }

    fn entry(&self, name: &str) -> Result<Arc<TopicEntry>> {
        if let Some(entry) = self.topics.read().get(name) {
            return Ok(Arc::clone(entry));
        }

        let mut topics = self.topics.write();
        if let Some(entry) = topics.get(name) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(TopicEntry::new(self.create_topic(name)?));
        topics.insert(name.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Remove `entry` from the map unless it was already replaced.
    fn forget(&self, name: &str, entry: &Arc<TopicEntry>) {
        let mut topics = self.topics.write();
        if topics.get(name).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            topics.remove(name);
        }
    }

    fn create_topic(&self, name: &str) -> Result<Arc<dyn Publisher>> {
        let journal = self
            .store
            .as_ref()
            .map(|store| TopicJournal::new(Arc::clone(store), name));

        let cache = match &journal {
            Some(journal) => journal.load().unwrap_or_else(|e| {
                tracing::warn!(topic = %name, error = %e, "failed to restore topic, starting empty");
                FullDiffCache::new()
            }),
            None => FullDiffCache::new(),
        };

        tracing::debug!(topic = %name, strategy = ?self.config.strategy, "creating topic");
        let t: Arc<dyn Publisher> = match self.config.strategy {
            Strategy::Spreader => Arc::new(Spreader::with_options(
                name,
                SpreaderConfig {
                    workers: self.config.workers,
                },
                cache,
                journal,
            )?),
            Strategy::Topic => Arc::new(Topic::with_options(name, cache, journal)),
        };
        Ok(t)
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.close();
    }
}
