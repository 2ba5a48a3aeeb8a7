//! Stream controller.
//!
//! A stream delivers a bounded historical range as sequenced batches. The
//! controller checks sequence continuity, accumulates progress and discards
//! frames for streams that have ended.

use crate::websocket::error::WebSocketError;
use crate::websocket::replay::FinishedIds;
use crate::websocket::types::{
    CancelReason, HistoricalBatch, StreamEndPayload, StreamEvent, StreamProgress,
    StreamProgressPayload, StreamStartedPayload, WsChannel,
};

/// A live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub stream_id: String,
    pub channel: WsChannel,
    pub symbol: String,
    pub start: i64,
    pub end: i64,
    pub batch_size: u32,
    /// Sequence number the next batch should carry
    pub expected_sequence: u64,
    pub records_delivered: u64,
    pub records_sent: u64,
    pub total: Option<u64>,
    stop_requested: bool,
}

impl StreamSession {
    fn progress(&self) -> StreamProgress {
        StreamProgress {
            stream_id: self.stream_id.clone(),
            records_delivered: self.records_delivered,
            records_sent: self.records_sent,
            total: self.total,
        }
    }
}

/// What to do with an inbound batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Hand the batch to the caller; `gap` is set when sequences were skipped.
    Deliver { gap: Option<WebSocketError> },
    /// Duplicate or backward sequence; dropped
    Stale { expected: u64, received: u64 },
    /// Unknown or finished stream
    Ignored,
}

#[derive(Debug, Default)]
pub struct StreamController {
    sessions: Vec<StreamSession>,
    finished: FinishedIds,
}

impl StreamController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamSession> {
        self.sessions.iter().find(|s| s.stream_id == stream_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &StreamSession> {
        self.sessions.iter()
    }

    /// End the live stream for (channel, symbol), if any.
    pub fn supersede(&mut self, channel: WsChannel, symbol: &str) -> Option<StreamSession> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.channel == channel && s.symbol == symbol)?;
        let session = self.sessions.remove(index);
        self.finished.insert(session.stream_id.clone());
        tracing::info!(
            "Stream {} superseded on {}:{}",
            session.stream_id,
            channel,
            symbol
        );
        Some(session)
    }

    /// Record a confirmed start.
    pub fn on_started(
        &mut self,
        payload: &StreamStartedPayload,
        batch_size: u32,
    ) -> (StreamEvent, Option<StreamSession>) {
        let superseded = self.supersede(payload.channel, &payload.coin);
        self.sessions.push(StreamSession {
            stream_id: payload.stream_id.clone(),
            channel: payload.channel,
            symbol: payload.coin.clone(),
            start: payload.start,
            end: payload.end,
            batch_size,
            expected_sequence: 0,
            records_delivered: 0,
            records_sent: 0,
            total: payload.total,
            stop_requested: false,
        });
        let event = StreamEvent::Started {
            stream_id: payload.stream_id.clone(),
            channel: payload.channel,
            symbol: payload.coin.clone(),
            start: payload.start,
            end: payload.end,
        };
        (event, superseded)
    }

    /// Check a batch against the expected sequence and account for it.
    pub fn on_batch(&mut self, batch: &HistoricalBatch) -> BatchOutcome {
        if self.finished.contains(&batch.stream_id) {
            tracing::debug!("Ignoring batch for finished stream {}", batch.stream_id);
            return BatchOutcome::Ignored;
        }
        let Some(session) = self
            .sessions
            .iter_mut()
            .find(|s| s.stream_id == batch.stream_id)
        else {
            tracing::debug!("Ignoring batch for unknown stream {}", batch.stream_id);
            return BatchOutcome::Ignored;
        };

        let expected = session.expected_sequence;
        let received = batch.sequence;
        if received < expected {
            tracing::warn!(
                "Dropping stale batch on stream {}: expected {}, received {}",
                batch.stream_id,
                expected,
                received
            );
            return BatchOutcome::Stale { expected, received };
        }

        let gap = (received > expected).then(|| {
            tracing::warn!(
                "Sequence gap on stream {}: expected {}, received {}",
                batch.stream_id,
                expected,
                received
            );
            WebSocketError::SequenceGap {
                stream_id: batch.stream_id.clone(),
                expected,
                received,
            }
        });

        session.expected_sequence = received + 1;
        session.records_delivered += batch.records.len() as u64;
        BatchOutcome::Deliver { gap }
    }

    pub fn on_progress(&mut self, payload: &StreamProgressPayload) -> Option<StreamProgress> {
        if self.finished.contains(&payload.stream_id) {
            return None;
        }
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.stream_id == payload.stream_id)?;
        session.records_sent = payload.records_sent;
        if payload.total.is_some() {
            session.total = payload.total;
        }
        Some(session.progress())
    }

    pub fn on_completed(&mut self, payload: &StreamEndPayload) -> Option<StreamEvent> {
        let session = self.finish(&payload.stream_id)?;
        Some(StreamEvent::Completed {
            stream_id: session.stream_id,
            records_delivered: session.records_delivered,
        })
    }

    pub fn on_stopped(&mut self, payload: &StreamEndPayload) -> Option<StreamEvent> {
        let session = self.finish(&payload.stream_id)?;
        Some(StreamEvent::Stopped {
            stream_id: session.stream_id,
            records_delivered: session.records_delivered,
        })
    }

    /// Mark a stop as requested; `true` only the first time for a live stream.
    pub fn request_stop(&mut self, stream_id: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.stream_id == stream_id) {
            Some(session) if !session.stop_requested => {
                session.stop_requested = true;
                true
            }
            _ => false,
        }
    }

    /// End every live stream.
    pub fn cancel_all(&mut self, reason: CancelReason) -> Vec<(StreamSession, StreamEvent)> {
        let sessions: Vec<_> = self.sessions.drain(..).collect();
        sessions
            .into_iter()
            .map(|session| {
                self.finished.insert(session.stream_id.clone());
                let event = StreamEvent::Cancelled {
                    stream_id: session.stream_id.clone(),
                    reason,
                };
                (session, event)
            })
            .collect()
    }

    fn finish(&mut self, stream_id: &str) -> Option<StreamSession> {
        let index = self.sessions.iter().position(|s| s.stream_id == stream_id);
        match index {
            Some(index) => {
                self.finished.insert(stream_id.to_string());
                Some(self.sessions.remove(index))
            }
            None => {
                tracing::debug!("Ignoring terminal frame for unknown stream {}", stream_id);
                None
            }
        }
    }
}
