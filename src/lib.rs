//! # Topicast
//!
//! Publish/subscribe core that delivers ordered, resumable update streams to
//! many concurrent subscribers per topic.
//!
//! ## Core Concepts
//!
//! - **Messages**: Full snapshots and incremental diffs, ordered by a logical timestamp
//! - **Cache**: Per-topic snapshot plus diff history, answering "what does a
//!   subscriber at cursor T need"
//! - **Spreader**: Serialized control path with concurrent, per-subscriber ordered delivery
//! - **Topic**: Simpler direct fan-out with the same contract
//! - **Broker**: Registry creating topics lazily and tearing them down when empty
//! - **Store**: Optional on-disk journal to restore topics after restart
//!
//! ## Example
//!
//! ```ignore
//! use topicast::{Broker, BrokerConfig, ChannelSubscriber, Message, Ts};
//!
//! let broker = Broker::new(BrokerConfig::default())?;
//!
//! broker.publish("scores", Message::full("scores", 1, snapshot).shared())?;
//! broker.publish("scores", Message::diff("scores", 2, change).shared())?;
//!
//! // Joins late, still gets the snapshot and the diff
//! let (subscriber, handle) = ChannelSubscriber::unbounded();
//! broker.subscribe("scores", subscriber.clone(), Ts::EARLIEST)?;
//!
//! let first = handle.recv()?;
//! assert!(first.is_full());
//! ```

pub mod broker;
pub mod cache;
pub mod error;
pub mod publisher;
pub mod spreader;
pub mod store;
pub mod subscribers;
pub mod topic;
pub mod types;

// Re-exports
pub use broker::{Broker, BrokerConfig, Strategy};
pub use cache::FullDiffCache;
pub use error::{BrokerError, Result};
pub use publisher::Publisher;
pub use spreader::{Spreader, SpreaderConfig};
pub use store::{ObjectStore, StoreConfig, StoredObject, TopicJournal};
pub use subscribers::{
    ChannelSubscriber, Subscriber, SubscriberHandle, SubscriberKey, SubscriberRef, SubscriberSet,
};
pub use topic::Topic;
pub use types::*;
