//! Delivery worker pool.

use crate::error::Result;
use crate::subscribers::SubscriberRef;
use crate::types::Message;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Work handed to a delivery worker.
pub(crate) enum Job {
    /// One live message to a group of subscribers.
    Deliver {
        subscribers: Arc<Vec<SubscriberRef>>,
        msg: Arc<Message>,
    },
    /// Catch-up sequence for a single new subscriber.
    CatchUp {
        subscriber: SubscriberRef,
        msgs: Vec<Arc<Message>>,
    },
    /// Barrier token; dropped once every earlier job on this worker is done.
    Flush(Sender<()>),
}

/// Fixed set of delivery threads, each draining its own FIFO queue.
pub(crate) struct WorkerPool {
    queues: Vec<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(name: &str, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = unbounded();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", name, index))
                .spawn(move || run(index, rx))?;
            queues.push(tx);
            handles.push(handle);
        }

        Ok(Self { queues, handles })
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn thread_ids(&self) -> Vec<ThreadId> {
        self.handles.iter().map(|h| h.thread().id()).collect()
    }

    pub(crate) fn dispatch(&self, worker: usize, job: Job) {
        if self.queues[worker].send(job).is_err() {
            tracing::warn!(worker, "delivery worker gone, job dropped");
        }
    }

    /// Queue a barrier token on every worker.
    pub(crate) fn flush(&self, ack: Sender<()>) {
        for queue in &self.queues {
            let _ = queue.send(Job::Flush(ack.clone()));
        }
    }

    /// Let workers finish queued jobs, then join them.
    pub(crate) fn shutdown(self) {
        drop(self.queues);
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::warn!("delivery worker panicked");
            }
        }
    }
}

fn run(index: usize, jobs: Receiver<Job>) {
    for job in jobs {
        match job {
            Job::Deliver { subscribers, msg } => {
                for subscriber in subscribers.iter() {
                    deliver(index, subscriber, &msg);
                }
            }
            Job::CatchUp { subscriber, msgs } => {
                for msg in &msgs {
                    deliver(index, &subscriber, msg);
                }
            }
            Job::Flush(ack) => drop(ack),
        }
    }
    tracing::trace!(worker = index, "delivery worker stopped");
}

/// Deliver one message; a subscriber panic is contained to this call.
fn deliver(index: usize, subscriber: &SubscriberRef, msg: &Arc<Message>) {
    if catch_unwind(AssertUnwindSafe(|| subscriber.send(msg))).is_err() {
        tracing::warn!(worker = index, topic = %msg.topic, ts = %msg.ts, "subscriber panicked during delivery");
    }
}
