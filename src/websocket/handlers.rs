//! Caller-facing event handlers.
//!
//! [`WsHandler`] is the callback surface of the client. Every method has a
//! no-op default, so implementors override only what they need. Handlers run
//! on the session task, in frame arrival order; they should not block.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::websocket::error::WebSocketError;
use crate::websocket::session::ConnectionState;
use crate::websocket::types::{
    HistoricalBatch, HistoricalData, ReplayEvent, StreamEvent, StreamProgress, WsData,
};

/// Callbacks for session events.
pub trait WsHandler: Send + Sync {
    /// Live data for any active subscription, after its per-subscription handler.
    fn on_data(&self, _data: &WsData) {}

    /// Non-fatal and fatal errors alike; check [`WebSocketError::is_fatal`].
    fn on_error(&self, _error: &WebSocketError) {}

    fn on_state_change(&self, _state: ConnectionState) {}

    fn on_stream_progress(&self, _progress: &StreamProgress) {}

    fn on_replay(&self, _event: &ReplayEvent) {}

    fn on_stream(&self, _event: &StreamEvent) {}

    /// One replayed record.
    fn on_historical_data(&self, _data: &HistoricalData) {}

    /// One stream batch, in sequence order (gaps reported through `on_error`).
    fn on_historical_batch(&self, _batch: &HistoricalBatch) {}
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl WsHandler for NoopHandler {}

/// Events emitted by [`EventForwarder`].
#[derive(Debug, Clone)]
pub enum WsEvent {
    StateChanged(ConnectionState),
    Data(WsData),
    Error(WebSocketError),
    Replay(ReplayEvent),
    Stream(StreamEvent),
    HistoricalData(HistoricalData),
    HistoricalBatch(HistoricalBatch),
    StreamProgress(StreamProgress),
}

/// Handler that turns callbacks into a stream of [`WsEvent`]s.
///
/// # Example
///
/// ```ignore
/// let (handler, mut events) = EventForwarder::channel();
/// client.set_handler(handler)?;
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<WsEvent>,
}

impl EventForwarder {
    pub fn new(tx: mpsc::UnboundedSender<WsEvent>) -> Self {
        Self { tx }
    }

    /// Create a forwarder and the receiving end of its events.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<WsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    fn emit(&self, event: WsEvent) {
        // receiver dropped: the caller stopped listening
        let _ = self.tx.send(event);
    }
}

impl WsHandler for EventForwarder {
    fn on_data(&self, data: &WsData) {
        self.emit(WsEvent::Data(data.clone()));
    }

    fn on_error(&self, error: &WebSocketError) {
        self.emit(WsEvent::Error(error.clone()));
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.emit(WsEvent::StateChanged(state));
    }

    fn on_stream_progress(&self, progress: &StreamProgress) {
        self.emit(WsEvent::StreamProgress(progress.clone()));
    }

    fn on_replay(&self, event: &ReplayEvent) {
        self.emit(WsEvent::Replay(event.clone()));
    }

    fn on_stream(&self, event: &StreamEvent) {
        self.emit(WsEvent::Stream(event.clone()));
    }

    fn on_historical_data(&self, data: &HistoricalData) {
        self.emit(WsEvent::HistoricalData(data.clone()));
    }

    fn on_historical_batch(&self, batch: &HistoricalBatch) {
        self.emit(WsEvent::HistoricalBatch(batch.clone()));
    }
}
