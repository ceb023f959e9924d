//! Subscribers and subscriber registries.
//!
//! A subscriber is anything implementing [`Subscriber`]: one method that
//! accepts a message. Handles are shared as `Arc<dyn Subscriber>` and
//! identified by pointer, so the same handle used to subscribe is the one
//! used to unsubscribe.
//!
//! # Example
//!
//! ```ignore
//! let (subscriber, handle) = ChannelSubscriber::unbounded();
//! broker.subscribe("scores", subscriber.clone(), Ts::EARLIEST);
//!
//! while let Ok(msg) = handle.recv() {
//!     println!("{:?} {}", msg.update_type, msg.ts);
//! }
//! ```

mod set;
mod types;

pub use set::SubscriberSet;
pub use types::{ChannelSubscriber, Subscriber, SubscriberHandle, SubscriberKey, SubscriberRef};
