//! Concurrent fan-out dispatcher.
//!
//! A [`Spreader`] owns one topic's cache and subscriber set behind a single
//! control thread and delivers through a bounded pool of worker threads.
//!
//! # Example
//!
//! ```ignore
//! let spreader = Spreader::new("scores")?;
//! spreader.publish(Message::full("scores", 1, snapshot).shared());
//!
//! let (subscriber, handle) = ChannelSubscriber::unbounded();
//! spreader.subscribe(subscriber, Ts::EARLIEST);
//! spreader.wait();
//!
//! assert_eq!(handle.drain().len(), 1);
//! ```

mod dispatcher;
mod worker;

pub use self::dispatcher::{Spreader, SpreaderConfig};
