//! Session lifecycle: connection states, reconnect policy and the offline queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::types::ClientCommand;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether `self -> to` is a legal transition.
    ///
    /// `Closed` is terminal. Reaching it from a live state without passing
    /// through `Closing` is the reconnect-exhausted path.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Disconnected, Closing)
                | (Connecting, Closing)
                | (Connected, Closing)
                | (Reconnecting, Closing)
                | (Closing, Closed)
                | (Connecting, Closed)
                | (Connected, Closed)
                | (Reconnecting, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::Closing => 4,
            Self::Closed => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            4 => Self::Closing,
            5 => Self::Closed,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free mirror of the session state, readable from the façade.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Reconnect policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect after a transport drop or failed handshake
    pub auto_reconnect: bool,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Fraction of the nominal delay that may be shaved off at random, in `[0, 0.5]`
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    /// Whether attempt number `attempt` (1-based) is within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.auto_reconnect && attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before attempt `attempt` without jitter: `base * 2^(attempt-1)`, capped.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Inclusive range a jittered delay for `attempt` falls in.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.nominal_delay(attempt);
        (nominal.mul_f64(1.0 - self.jitter_fraction()), nominal)
    }

    /// Jittered delay for `attempt`, drawn from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let jitter = self.jitter_fraction();
        if jitter == 0.0 {
            return nominal;
        }
        let shave = rng.gen_range(0.0..=jitter);
        nominal.mul_f64(1.0 - shave)
    }

    /// Jittered delay for `attempt` using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    fn jitter_fraction(&self) -> f64 {
        if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 0.5)
        }
    }
}

/// State owned by the session task.
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    shared: SharedState,
    reconnect_attempts: u32,
    pending: VecDeque<ClientCommand>,
}

impl Session {
    pub fn new(shared: SharedState) -> Self {
        Self {
            state: shared.load(),
            shared,
            reconnect_attempts: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Move to `to`, returning the previous state.
    pub fn transition(&mut self, to: ConnectionState) -> WsResult<ConnectionState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(WebSocketError::InvalidTransition { from, to });
        }
        tracing::debug!("Session state {} -> {}", from, to);
        self.state = to;
        self.shared.store(to);
        Ok(from)
    }

    /// Count one failed attempt and return the new attempt number.
    pub fn record_failure(&mut self) -> u32 {
        self.reconnect_attempts += 1;
        self.reconnect_attempts
    }

    pub fn reset_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Queue a command for the next connection.
    pub fn enqueue(&mut self, command: ClientCommand) {
        self.pending.push_back(command);
    }

    /// Take every queued command, oldest first.
    pub fn drain_pending(&mut self) -> Vec<ClientCommand> {
        self.pending.drain(..).collect()
    }

    /// Request ids of the queued commands.
    pub fn pending_request_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending.iter().filter_map(ClientCommand::request_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
