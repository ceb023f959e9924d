//! The contract shared by the fan-out strategies.

use crate::subscribers::SubscriberRef;
use crate::types::{Message, Ts};
use std::sync::Arc;

/// A topic's fan-out engine.
///
/// Both [`Spreader`](crate::Spreader) and [`Topic`](crate::Topic) implement
/// this, so the broker can pick a strategy per topic without caring which
/// one it got.
pub trait Publisher: Send + Sync {
    /// Topic name.
    fn name(&self) -> &str;

    /// Send the catch-up sequence for `from` to `subscriber`, then register
    /// it for live messages.
    fn subscribe(&self, subscriber: SubscriberRef, from: Ts);

    /// Deregister `subscriber`. Returns true when no subscribers remain.
    fn unsubscribe(&self, subscriber: &SubscriberRef) -> bool;

    /// Apply `msg` to the cache and deliver it to every live subscriber.
    fn publish(&self, msg: Arc<Message>);

    /// The sequence a subscriber starting from nothing would receive.
    fn replay(&self) -> Option<Vec<Arc<Message>>>;

    /// Sort and deduplicate the diff history.
    fn compact(&self);

    /// Block until every previously admitted operation, including its
    /// deliveries, has completed.
    fn wait(&self);

    /// Stop accepting operations and release resources.
    fn close(&self);
}
