//! Timestamped records carried by replay and stream frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A single historical record: a timestamp plus the raw channel payload.
///
/// The payload shape depends on the channel (an [`OrderBook`](super::OrderBook)
/// for `orderbook`, a list of [`Trade`](super::Trade)s for `trades`, ...); use
/// [`TimestampedRecord::parse`] to deserialize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedRecord {
    /// Unix milliseconds
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl TimestampedRecord {
    /// Deserialize the payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}
