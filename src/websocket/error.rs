//! WebSocket-specific error types for the 0xarchive SDK.

use thiserror::Error;

use crate::websocket::session::ConnectionState;

/// Errors produced while decoding an inbound frame.
///
/// Decode errors are never fatal: the session logs them, reports them through
/// `WsHandler::on_error` and keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame was not valid JSON
    #[error("Invalid JSON frame: {0}")]
    InvalidJson(String),

    /// Frame had no string `type` field
    #[error("Frame is missing its type tag")]
    MissingTag,

    /// Frame carried a tag this client does not know
    #[error("Unknown frame type: {0}")]
    UnknownTag(String),

    /// Recognized tag but the payload did not match its schema
    #[error("Malformed '{tag}' frame: {reason}")]
    Malformed { tag: String, reason: String },
}

/// WebSocket-specific errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WebSocketError {
    /// Transport-level failure on an established connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Handshake failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Reconnect budget exhausted; the session is closed
    #[error("Reconnect attempts exhausted after {attempts} attempt(s)")]
    ReconnectExhausted { attempts: u32 },

    /// Inbound frame could not be decoded
    #[error("Failed to decode frame: {0}")]
    Decode(#[from] DecodeError),

    /// No matching ack arrived in time
    #[error("Timed out waiting for '{operation}' acknowledgement (request {request_id})")]
    AckTimeout {
        operation: &'static str,
        request_id: u64,
    },

    /// Non-contiguous batch sequence on a stream
    #[error("Sequence gap on stream {stream_id}: expected {expected}, received {received}")]
    SequenceGap {
        stream_id: String,
        expected: u64,
        received: u64,
    },

    /// Server returned an error frame
    #[error("Server error: {message} (code: {code:?})")]
    Server {
        code: Option<String>,
        message: String,
        request_id: Option<u64>,
    },

    /// Pending request cancelled by `close()`, or its replay or stream ended first
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },

    /// No pong within the heartbeat deadline
    #[error("Pong not received within the heartbeat deadline")]
    PongTimeout,

    /// `connect()` has not been called
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// The session reached its terminal state
    #[error("Session is closed")]
    Closed,

    /// Send failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// State machine rejected a transition
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Caller passed an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid URL
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// No transport compiled in and no custom connector supplied
    #[error("No WebSocket transport available: enable the `ws-native` feature or supply a connector")]
    TransportUnavailable,
}

impl WebSocketError {
    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. } | Self::Closed)
    }
}

#[cfg(feature = "ws-native")]
impl From<tokio_tungstenite::tungstenite::Error> for WebSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => {
                WebSocketError::Transport("connection closed".to_string())
            }
            Error::Io(e) => WebSocketError::Transport(e.to_string()),
            Error::Url(e) => WebSocketError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                WebSocketError::ConnectionFailed(format!("HTTP error: {:?}", resp.status()))
            }
            Error::HttpFormat(e) => WebSocketError::ConnectionFailed(e.to_string()),
            other => WebSocketError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WebSocketError {
    fn from(err: serde_json::Error) -> Self {
        WebSocketError::InvalidArgument(format!("serialization failed: {}", err))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WebSocketError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WebSocketError::Closed
    }
}

/// Result type alias for WebSocket operations
pub type WsResult<T> = Result<T, WebSocketError>;
