//! Timestamp normalization.
//!
//! Every time range on the wire is expressed in Unix milliseconds. Callers may
//! hand over integers, `chrono` datetimes or ISO-8601 strings; [`Timestamp`]
//! normalizes all of them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// A point in time accepted by replay and stream requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    /// Unix milliseconds
    Millis(i64),
    /// A UTC datetime
    DateTime(DateTime<Utc>),
    /// ISO-8601 text (`2024-01-01`, `2024-01-01T00:00:00Z`) or a numeric string
    Text(String),
}

impl Timestamp {
    /// Convert to Unix milliseconds.
    ///
    /// Returns `None` when a text timestamp is neither ISO-8601 nor an integer.
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::DateTime(dt) => Some(dt.timestamp_millis()),
            Self::Text(text) => parse_text(text),
        }
    }
}

fn parse_text(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text.replace('Z', "+00:00")) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().timestamp_millis());
    }
    text.parse::<i64>().ok()
}

impl From<i64> for Timestamp {
    fn from(ms: i64) -> Self {
        Self::Millis(ms)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<&str> for Timestamp {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Timestamp {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Deserializes either Unix milliseconds or an RFC 3339 string into `DateTime<Utc>`.
///
/// REST payloads carry ISO-8601 text while some WebSocket payloads carry epoch
/// milliseconds; both shapes land in the same field types.
pub mod flexible {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {}", millis))),
            Raw::Text(text) => super::Timestamp::Text(text.clone())
                .to_millis()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {}", text))),
        }
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }
}
