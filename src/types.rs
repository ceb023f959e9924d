//! Core types shared by the cache, the fan-out strategies and the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Logical timestamp of a message within a topic.
///
/// Not necessarily wall-clock time; only the ordering matters.
/// `Ts::default()` (zero) means "has seen nothing".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Ts(pub i64);

impl Ts {
    /// The earliest possible cursor.
    pub const EARLIEST: Ts = Ts(0);

    /// The following timestamp, saturating at `i64::MAX`.
    pub fn next(self) -> Self {
        Ts(self.0.saturating_add(1))
    }
}

impl fmt::Debug for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ts({})", self.0)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Ts {
    fn from(v: i64) -> Self {
        Ts(v)
    }
}

/// Whether a message carries complete state or an incremental change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    /// Complete topic state.
    Full,
    /// Change since some earlier state.
    Diff,
}

/// Payload encoding format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PayloadEncoding {
    #[default]
    Raw,
    Json,
    MessagePack,
}

/// A published update.
///
/// Messages are immutable once published and are shared between the cache
/// and every subscriber as `Arc<Message>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic this message belongs to.
    pub topic: String,

    /// Logical timestamp.
    pub ts: Ts,

    /// Full snapshot or diff.
    pub update_type: UpdateType,

    /// Set on copies re-sent from history rather than freshly produced.
    #[serde(default)]
    pub replay: bool,

    /// Payload encoding.
    pub encoding: PayloadEncoding,

    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a full snapshot message with a raw payload.
    pub fn full(topic: impl Into<String>, ts: i64, payload: Vec<u8>) -> Self {
        Self::raw(topic, ts, UpdateType::Full, payload)
    }

    /// Create a diff message with a raw payload.
    pub fn diff(topic: impl Into<String>, ts: i64, payload: Vec<u8>) -> Self {
        Self::raw(topic, ts, UpdateType::Diff, payload)
    }

    /// Create a message with a JSON payload.
    pub fn json(
        topic: impl Into<String>,
        ts: i64,
        update_type: UpdateType,
        payload: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.into(),
            ts: Ts(ts),
            update_type,
            replay: false,
            encoding: PayloadEncoding::Json,
            payload: serde_json::to_vec(payload)?,
        })
    }

    fn raw(topic: impl Into<String>, ts: i64, update_type: UpdateType, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            ts: Ts(ts),
            update_type,
            replay: false,
            encoding: PayloadEncoding::Raw,
            payload,
        }
    }

    /// Mark this message as a replayed copy.
    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    pub fn is_full(&self) -> bool {
        self.update_type == UpdateType::Full
    }

    pub fn is_diff(&self) -> bool {
        self.update_type == UpdateType::Diff
    }

    /// Decode a JSON payload.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Wrap in an `Arc` for publishing.
    pub fn shared(self) -> Arc<Message> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_ordering() {
        assert!(Ts(1) < Ts(2));
        assert_eq!(Ts::default(), Ts::EARLIEST);
        assert_eq!(Ts(5).next(), Ts(6));
        assert_eq!(Ts(i64::MAX).next(), Ts(i64::MAX));
    }

    #[test]
    fn test_message_json() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Score {
            home: u32,
            away: u32,
        }

        let msg = Message::json("match", 7, UpdateType::Diff, &Score { home: 1, away: 0 }).unwrap();
        assert_eq!(msg.encoding, PayloadEncoding::Json);
        assert!(msg.is_diff());
        assert_eq!(msg.decode_json::<Score>().unwrap(), Score { home: 1, away: 0 });
    }

    #[test]
    fn test_replay_flag() {
        let msg = Message::diff("m", 3, Vec::new()).with_replay(true);
        assert!(msg.replay);
        assert!(!msg.is_full());
    }
}
