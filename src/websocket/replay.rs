//! Replay controller.
//!
//! Tracks server-side replay sessions. State only moves when the server
//! acknowledges a command; sending `replay.pause` does not mark the replay
//! paused until `replay_paused` arrives.

use std::collections::{HashSet, VecDeque};

use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::types::{
    CancelReason, HistoricalData, ReplayAckPayload, ReplayCompletedPayload, ReplayEvent,
    ReplayStartedPayload, WsChannel,
};

/// How many finished ids are remembered for discarding late frames.
const FINISHED_MEMORY: usize = 256;

/// Bounded set of ids whose session has ended.
#[derive(Debug, Default)]
pub(crate) struct FinishedIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl FinishedIds {
    pub(crate) fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > FINISHED_MEMORY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Started,
    Paused,
}

/// A live replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySession {
    pub replay_id: String,
    pub channel: WsChannel,
    pub symbol: String,
    pub start: i64,
    pub end: Option<i64>,
    pub speed: Option<f64>,
    pub state: ReplayState,
    stop_requested: bool,
}

#[derive(Debug, Default)]
pub struct ReplayController {
    sessions: Vec<ReplaySession>,
    finished: FinishedIds,
}

impl ReplayController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, replay_id: &str) -> Option<&ReplaySession> {
        self.sessions.iter().find(|s| s.replay_id == replay_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &ReplaySession> {
        self.sessions.iter()
    }

    /// End the live replay for (channel, symbol), if any, so a new one can take its place.
    pub fn supersede(&mut self, channel: WsChannel, symbol: &str) -> Option<ReplaySession> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.channel == channel && s.symbol == symbol)?;
        let session = self.sessions.remove(index);
        self.finished.insert(session.replay_id.clone());
        tracing::info!(
            "Replay {} superseded on {}:{}",
            session.replay_id,
            channel,
            symbol
        );
        Some(session)
    }

    /// Record a confirmed start.
    ///
    /// Also returns any replay that was still live on the same key.
    pub fn on_started(
        &mut self,
        payload: &ReplayStartedPayload,
    ) -> (ReplayEvent, Option<ReplaySession>) {
        let superseded = self.supersede(payload.channel, &payload.coin);
        self.sessions.push(ReplaySession {
            replay_id: payload.replay_id.clone(),
            channel: payload.channel,
            symbol: payload.coin.clone(),
            start: payload.start,
            end: payload.end,
            speed: payload.speed,
            state: ReplayState::Started,
            stop_requested: false,
        });
        let event = ReplayEvent::Started {
            replay_id: payload.replay_id.clone(),
            channel: payload.channel,
            symbol: payload.coin.clone(),
            start: payload.start,
            end: payload.end,
        };
        (event, superseded)
    }

    pub fn on_paused(&mut self, payload: &ReplayAckPayload) -> Option<ReplayEvent> {
        let session = self.live_mut(&payload.replay_id)?;
        session.state = ReplayState::Paused;
        Some(ReplayEvent::Paused {
            replay_id: payload.replay_id.clone(),
            current_timestamp: payload.current_timestamp,
        })
    }

    pub fn on_resumed(&mut self, payload: &ReplayAckPayload) -> Option<ReplayEvent> {
        let session = self.live_mut(&payload.replay_id)?;
        session.state = ReplayState::Started;
        Some(ReplayEvent::Resumed {
            replay_id: payload.replay_id.clone(),
            current_timestamp: payload.current_timestamp,
        })
    }

    pub fn on_completed(&mut self, payload: &ReplayCompletedPayload) -> Option<ReplayEvent> {
        self.finish(&payload.replay_id)?;
        Some(ReplayEvent::Completed {
            replay_id: payload.replay_id.clone(),
            records_sent: payload.records_sent,
        })
    }

    pub fn on_stopped(&mut self, payload: &ReplayAckPayload) -> Option<ReplayEvent> {
        self.finish(&payload.replay_id)?;
        Some(ReplayEvent::Stopped {
            replay_id: payload.replay_id.clone(),
        })
    }

    /// Whether a replayed record belongs to a live replay.
    pub fn accepts(&self, data: &HistoricalData) -> bool {
        if self.finished.contains(&data.replay_id) {
            tracing::debug!("Ignoring data for finished replay {}", data.replay_id);
            return false;
        }
        self.get(&data.replay_id).is_some()
    }

    /// Mark a stop as requested.
    ///
    /// Returns `true` only the first time for a live replay; unknown, finished
    /// and already-stopping ids are a no-op.
    pub fn request_stop(&mut self, replay_id: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.replay_id == replay_id) {
            Some(session) if !session.stop_requested => {
                session.stop_requested = true;
                true
            }
            _ => false,
        }
    }

    /// Check that pause / resume may be sent for `replay_id`.
    pub fn ensure_controllable(&self, replay_id: &str) -> WsResult<()> {
        match self.get(replay_id) {
            Some(session) if !session.stop_requested => Ok(()),
            Some(_) => Err(WebSocketError::InvalidArgument(format!(
                "replay {} is stopping",
                replay_id
            ))),
            None => Err(WebSocketError::InvalidArgument(format!(
                "unknown replay id: {}",
                replay_id
            ))),
        }
    }

    /// End every live replay, e.g. on connection loss or close.
    pub fn cancel_all(&mut self, reason: CancelReason) -> Vec<(ReplaySession, ReplayEvent)> {
        let sessions: Vec<_> = self.sessions.drain(..).collect();
        sessions
            .into_iter()
            .map(|session| {
                self.finished.insert(session.replay_id.clone());
                let event = ReplayEvent::Cancelled {
                    replay_id: session.replay_id.clone(),
                    reason,
                };
                (session, event)
            })
            .collect()
    }

    fn live_mut(&mut self, replay_id: &str) -> Option<&mut ReplaySession> {
        let found = self.sessions.iter_mut().find(|s| s.replay_id == replay_id);
        if found.is_none() {
            tracing::debug!("Ignoring ack for unknown replay {}", replay_id);
        }
        found
    }

    fn finish(&mut self, replay_id: &str) -> Option<ReplaySession> {
        let index = self.sessions.iter().position(|s| s.replay_id == replay_id);
        match index {
            Some(index) => {
                self.finished.insert(replay_id.to_string());
                Some(self.sessions.remove(index))
            }
            None => {
                tracing::debug!("Ignoring terminal frame for unknown replay {}", replay_id);
                None
            }
        }
    }
}
