//! Serialized control path plus concurrent delivery.

use super::worker::{Job, WorkerPool};
use crate::cache::FullDiffCache;
use crate::error::Result;
use crate::publisher::Publisher;
use crate::store::TopicJournal;
use crate::subscribers::{SubscriberKey, SubscriberRef, SubscriberSet};
use crate::types::{Message, Ts};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Default number of delivery workers per topic.
const DEFAULT_WORKERS: usize = 8;

/// Spreader configuration.
#[derive(Clone, Debug)]
pub struct SpreaderConfig {
    /// Delivery threads. Each subscriber is pinned to one of them.
    pub workers: usize,
}

impl Default for SpreaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Operations admitted to the control path.
enum Command {
    Publish(Arc<Message>),
    Subscribe {
        subscriber: SubscriberRef,
        from: Ts,
    },
    Unsubscribe {
        subscriber: SubscriberRef,
        reply: Sender<bool>,
    },
    Replay {
        reply: Sender<Option<Vec<Arc<Message>>>>,
    },
    Compact,
    Wait(Sender<()>),
    Close,
}

/// Concurrent fan-out for one topic.
///
/// Every operation goes through a single control thread that owns the cache
/// and the subscriber set, so they are only ever touched in admission order.
/// Delivery is handed to a pool of workers. A subscriber always lands on the
/// same worker, which keeps its messages in order (catch-up first, then live)
/// while slow subscribers on other workers don't hold it up.
///
/// Subscribers pinned to the same worker share it, so a subscriber that
/// blocks in `send` also delays the others on its worker.
///
/// `publish` and `subscribe` return as soon as the command is queued; use
/// [`wait`](Spreader::wait) to observe completion.
pub struct Spreader {
    name: String,
    commands: Sender<Command>,
    control: Mutex<Option<JoinHandle<()>>>,
    /// Control and worker threads; `close` can't join from one of these.
    threads: Vec<ThreadId>,
    closed: AtomicBool,
}

impl Spreader {
    /// Start a spreader with default configuration and an empty cache.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_options(name, SpreaderConfig::default(), FullDiffCache::new(), None)
    }

    /// Start a spreader seeded with `cache`, optionally persisting every
    /// publish through `journal`.
    pub fn with_options(
        name: impl Into<String>,
        config: SpreaderConfig,
        cache: FullDiffCache,
        journal: Option<TopicJournal>,
    ) -> Result<Self> {
        let name = name.into();
        let pool = WorkerPool::spawn(&name, config.workers)?;
        let mut threads = pool.thread_ids();
        let (commands, rx) = unbounded();

        let control = ControlLoop {
            name: name.clone(),
            cache,
            subscribers: SubscriberSet::new(),
            groups: Vec::new(),
            groups_dirty: true,
            pool,
            journal,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-control", name))
            .spawn(move || control.run(rx))?;
        threads.push(handle.thread().id());

        tracing::debug!(topic = %name, workers = config.workers.max(1), "spreader started");

        Ok(Self {
            name,
            commands,
            control: Mutex::new(Some(handle)),
            threads,
            closed: AtomicBool::new(false),
        })
    }

    fn submit(&self, command: Command) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(topic = %self.name, "spreader closed, operation ignored");
            return false;
        }
        self.commands.send(command).is_ok()
    }
}

impl Publisher for Spreader {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, subscriber: SubscriberRef, from: Ts) {
        self.submit(Command::Subscribe { subscriber, from });
    }

    fn unsubscribe(&self, subscriber: &SubscriberRef) -> bool {
        let (reply, rx) = bounded(1);
        let command = Command::Unsubscribe {
            subscriber: Arc::clone(subscriber),
            reply,
        };
        if !self.submit(command) {
            return true;
        }
        rx.recv().unwrap_or(true)
    }

    fn publish(&self, msg: Arc<Message>) {
        self.submit(Command::Publish(msg));
    }

    fn replay(&self) -> Option<Vec<Arc<Message>>> {
        let (reply, rx) = bounded(1);
        if !self.submit(Command::Replay { reply }) {
            return None;
        }
        rx.recv().ok().flatten()
    }

    fn compact(&self) {
        self.submit(Command::Compact);
    }

    fn wait(&self) {
        let (ack, done) = bounded::<()>(0);
        if self.submit(Command::Wait(ack)) {
            // Disconnects once every worker has dropped its barrier token.
            let _ = done.recv();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(Command::Close);
        let handle = self.control.lock().take();
        if self.threads.contains(&thread::current().id()) {
            // Closed from inside a delivery; the threads wind down on their own.
            tracing::debug!(topic = %self.name, "spreader closing from its own thread");
            return;
        }
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(topic = %self.name, "spreader control thread panicked");
            }
        }
        tracing::debug!(topic = %self.name, "spreader closed");
    }
}

impl Drop for Spreader {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the control thread.
struct ControlLoop {
    name: String,
    cache: FullDiffCache,
    subscribers: SubscriberSet,
    /// Live subscribers grouped by worker, rebuilt after membership changes.
    groups: Vec<Arc<Vec<SubscriberRef>>>,
    groups_dirty: bool,
    pool: WorkerPool,
    journal: Option<TopicJournal>,
}

impl ControlLoop {
    fn run(mut self, commands: Receiver<Command>) {
        for command in commands.iter() {
            match command {
                Command::Publish(msg) => self.publish(msg),
                Command::Subscribe { subscriber, from } => self.subscribe(subscriber, from),
                Command::Unsubscribe { subscriber, reply } => {
                    if self.subscribers.remove(&subscriber) {
                        self.groups_dirty = true;
                    }
                    let _ = reply.send(self.subscribers.is_empty());
                }
                Command::Replay { reply } => {
                    let _ = reply.send(self.cache.reset_sequence());
                }
                Command::Compact => {
                    let removed = self.cache.compact();
                    tracing::trace!(topic = %self.name, removed, "compacted diffs");
                }
                Command::Wait(ack) => self.pool.flush(ack),
                Command::Close => break,
            }
        }

        // Commands still queued behind Close are dropped along with the
        // receiver; their reply senders go with them.
        self.subscribers.clear();
        self.groups.clear();
        self.pool.shutdown();
        tracing::trace!(topic = %self.name, "control loop stopped");
    }

    fn publish(&mut self, msg: Arc<Message>) {
        self.cache.add(Arc::clone(&msg));

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&msg) {
                tracing::warn!(topic = %self.name, ts = %msg.ts, error = %e, "failed to persist message");
            }
        }

        if self.subscribers.is_empty() {
            return;
        }
        if self.groups_dirty {
            self.regroup();
        }

        tracing::trace!(topic = %self.name, ts = %msg.ts, subscribers = self.subscribers.len(), "spreading");
        for (worker, group) in self.groups.iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            self.pool.dispatch(
                worker,
                Job::Deliver {
                    subscribers: Arc::clone(group),
                    msg: Arc::clone(&msg),
                },
            );
        }
    }

    fn subscribe(&mut self, subscriber: SubscriberRef, from: Ts) {
        if self.subscribers.contains(&subscriber) {
            tracing::debug!(topic = %self.name, "already subscribed");
            return;
        }

        let worker = SubscriberKey::of(&subscriber).slot(self.pool.len());
        if let Some(msgs) = self.cache.find(from) {
            if !msgs.is_empty() {
                self.pool.dispatch(
                    worker,
                    Job::CatchUp {
                        subscriber: Arc::clone(&subscriber),
                        msgs,
                    },
                );
            }
        }

        self.subscribers.insert(subscriber);
        self.groups_dirty = true;
    }

    fn regroup(&mut self) {
        let n = self.pool.len();
        let mut groups: Vec<Vec<SubscriberRef>> = vec![Vec::new(); n];
        for (key, subscriber) in self.subscribers.iter() {
            groups[key.slot(n)].push(Arc::clone(subscriber));
        }
        self.groups = groups.into_iter().map(Arc::new).collect();
        self.groups_dirty = false;
    }
}
