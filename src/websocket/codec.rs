//! Frame codec: raw text frames to [`Frame`] values and commands to text.
//!
//! Decoding is two-phase: the `type` tag is read from a generic JSON value and
//! routed through [`FrameType`], then the payload is deserialized for that tag.
//! This keeps "unknown tag" and "known tag, bad payload" distinguishable.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::websocket::error::{DecodeError, WsResult};
use crate::websocket::types::{ClientCommand, Frame};

/// Inbound frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Subscribed,
    Unsubscribed,
    Pong,
    Error,
    Data,
    ReplayStarted,
    ReplayPaused,
    ReplayResumed,
    ReplayCompleted,
    ReplayStopped,
    HistoricalData,
    StreamStarted,
    StreamProgress,
    HistoricalBatch,
    StreamCompleted,
    StreamStopped,
    Unknown,
}

impl From<&str> for FrameType {
    fn from(s: &str) -> Self {
        match s {
            "subscribed" => FrameType::Subscribed,
            "unsubscribed" => FrameType::Unsubscribed,
            "pong" => FrameType::Pong,
            "error" => FrameType::Error,
            "data" => FrameType::Data,
            "replay_started" => FrameType::ReplayStarted,
            "replay_paused" => FrameType::ReplayPaused,
            "replay_resumed" => FrameType::ReplayResumed,
            "replay_completed" => FrameType::ReplayCompleted,
            "replay_stopped" => FrameType::ReplayStopped,
            "historical_data" => FrameType::HistoricalData,
            "stream_started" => FrameType::StreamStarted,
            "stream_progress" => FrameType::StreamProgress,
            "historical_batch" => FrameType::HistoricalBatch,
            "stream_completed" => FrameType::StreamCompleted,
            "stream_stopped" => FrameType::StreamStopped,
            _ => FrameType::Unknown,
        }
    }
}

/// Decode one inbound text frame.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingTag)?
        .to_string();

    let frame = match FrameType::from(tag.as_str()) {
        FrameType::Subscribed => Frame::Subscribed(payload(&tag, value)?),
        FrameType::Unsubscribed => Frame::Unsubscribed(payload(&tag, value)?),
        FrameType::Pong => Frame::Pong,
        FrameType::Error => Frame::Error(payload(&tag, value)?),
        FrameType::Data => Frame::Data(payload(&tag, value)?),
        FrameType::ReplayStarted => Frame::ReplayStarted(payload(&tag, value)?),
        FrameType::ReplayPaused => Frame::ReplayPaused(payload(&tag, value)?),
        FrameType::ReplayResumed => Frame::ReplayResumed(payload(&tag, value)?),
        FrameType::ReplayCompleted => Frame::ReplayCompleted(payload(&tag, value)?),
        FrameType::ReplayStopped => Frame::ReplayStopped(payload(&tag, value)?),
        FrameType::HistoricalData => Frame::HistoricalData(payload(&tag, value)?),
        FrameType::StreamStarted => Frame::StreamStarted(payload(&tag, value)?),
        FrameType::StreamProgress => Frame::StreamProgress(payload(&tag, value)?),
        FrameType::HistoricalBatch => Frame::HistoricalBatch(payload(&tag, value)?),
        FrameType::StreamCompleted => Frame::StreamCompleted(payload(&tag, value)?),
        FrameType::StreamStopped => Frame::StreamStopped(payload(&tag, value)?),
        FrameType::Unknown => return Err(DecodeError::UnknownTag(tag)),
    };
    Ok(frame)
}

fn payload<T: DeserializeOwned>(tag: &str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

/// Encode one outbound command.
pub fn encode(command: &ClientCommand) -> WsResult<String> {
    Ok(serde_json::to_string(command)?)
}
