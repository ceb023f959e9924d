//! The subscriber capability and a channel-backed implementation.

use crate::types::Message;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Anything that can accept a published message.
///
/// Delivery may be slow or block; the fan-out strategies never call it from
/// more than one thread at a time for the same subscriber, and always in
/// publish order. Failures are the implementation's own business.
pub trait Subscriber: Send + Sync {
    fn send(&self, msg: &Arc<Message>);
}

/// Shared subscriber handle. Identity is the allocation it points to.
pub type SubscriberRef = Arc<dyn Subscriber>;

/// Identity of a subscriber handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey(usize);

impl SubscriberKey {
    pub fn of(subscriber: &SubscriberRef) -> Self {
        SubscriberKey(Arc::as_ptr(subscriber) as *const () as usize)
    }

    /// Pick one of `n` slots for this subscriber. Stable for the lifetime of
    /// the allocation.
    pub fn slot(self, n: usize) -> usize {
        // Allocations are at least word aligned; drop the always-zero bits.
        (self.0 >> 4) % n.max(1)
    }
}

impl fmt::Debug for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberKey({:#x})", self.0)
    }
}

/// Subscriber that forwards messages into a crossbeam channel.
pub struct ChannelSubscriber {
    sender: Sender<Arc<Message>>,
}

impl ChannelSubscriber {
    /// Unbounded buffer; never drops.
    pub fn unbounded() -> (SubscriberRef, SubscriberHandle) {
        let (sender, receiver) = unbounded();
        (Arc::new(Self { sender }), SubscriberHandle { receiver })
    }

    /// At most `capacity` buffered messages; further messages are dropped
    /// until the receiver catches up.
    pub fn bounded(capacity: usize) -> (SubscriberRef, SubscriberHandle) {
        let (sender, receiver) = bounded(capacity);
        (Arc::new(Self { sender }), SubscriberHandle { receiver })
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&self, msg: &Arc<Message>) {
        match self.sender.try_send(Arc::clone(msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(topic = %msg.topic, ts = %msg.ts, "subscriber buffer full, message dropped");
            }
            Err(TrySendError::Disconnected(msg)) => {
                tracing::debug!(topic = %msg.topic, ts = %msg.ts, "subscriber receiver gone");
            }
        }
    }
}

/// Receiving end of a [`ChannelSubscriber`].
pub struct SubscriberHandle {
    receiver: Receiver<Arc<Message>>,
}

impl SubscriberHandle {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> Result<Arc<Message>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> Result<Arc<Message>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<Message>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take everything currently buffered.
    pub fn drain(&self) -> Vec<Arc<Message>> {
        self.receiver.try_iter().collect()
    }
}
