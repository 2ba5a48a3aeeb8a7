//! Background session task.
//!
//! One tokio task per client owns the transport, the subscription registry,
//! the replay and stream controllers, the offline queue and the ack table. The
//! public [`OxArchiveWs`](crate::websocket::OxArchiveWs) talks to it over an
//! mpsc command channel; every reply travels back on a oneshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::websocket::codec;
use crate::websocket::config::WsOptions;
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::handlers::{NoopHandler, WsHandler};
use crate::websocket::replay::ReplayController;
use crate::websocket::session::{ConnectionState, Session, SharedState};
use crate::websocket::stream::{BatchOutcome, StreamController};
use crate::websocket::subscriptions::{Subscription, SubscriptionManager};
use crate::websocket::transport::{Connector, Transport};
use crate::websocket::types::{
    CancelReason, ClientCommand, Frame, ReplayEvent, StreamEvent, WsChannel,
};

// ─── Request ids ─────────────────────────────────────────────────────────────

/// Monotonic request id source shared by the façade and the task.
#[derive(Debug, Clone)]
pub(crate) struct RequestIds(Arc<AtomicU64>);

impl RequestIds {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

// ─── Commands from public API to background task ─────────────────────────────

pub(crate) enum Command {
    Subscribe {
        request_id: u64,
        subscription: Subscription,
        reply: oneshot::Sender<WsResult<()>>,
    },
    Unsubscribe {
        request_id: u64,
        channel: WsChannel,
        symbol: String,
        reply: oneshot::Sender<WsResult<()>>,
    },
    StartReplay {
        request_id: u64,
        channel: WsChannel,
        symbol: String,
        start: i64,
        end: Option<i64>,
        speed: Option<f64>,
        reply: oneshot::Sender<WsResult<String>>,
    },
    ControlReplay {
        request_id: u64,
        action: ReplayAction,
        replay_id: String,
        reply: oneshot::Sender<WsResult<()>>,
    },
    StartStream {
        request_id: u64,
        channel: WsChannel,
        symbol: String,
        start: i64,
        end: i64,
        batch_size: u32,
        reply: oneshot::Sender<WsResult<String>>,
    },
    StopStream {
        request_id: u64,
        stream_id: String,
        reply: oneshot::Sender<WsResult<()>>,
    },
    SetHandler(Arc<dyn WsHandler>),
    Close {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    /// Answer a command that will never be executed.
    pub(crate) fn reject(self, error: WebSocketError) {
        match self {
            Command::Subscribe { reply, .. }
            | Command::Unsubscribe { reply, .. }
            | Command::ControlReplay { reply, .. }
            | Command::StopStream { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::StartReplay { reply, .. } | Command::StartStream { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::SetHandler(_) => {}
            Command::Close { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayAction {
    Pause,
    Resume,
    Stop,
}

// ─── Ack correlation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckKind {
    Subscribe,
    Unsubscribe,
    Replay,
    ReplayPause,
    ReplayResume,
    ReplayStop,
    Stream,
    StreamStop,
}

impl AckKind {
    fn operation(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Replay => "replay",
            Self::ReplayPause => "replay.pause",
            Self::ReplayResume => "replay.resume",
            Self::ReplayStop => "replay.stop",
            Self::Stream => "stream",
            Self::StreamStop => "stream.stop",
        }
    }
}

/// What an ack frame refers to, for correlation without an echoed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AckKey {
    Feed(WsChannel, String),
    Replay(String),
    Stream(String),
}

pub(crate) enum Reply {
    Unit(oneshot::Sender<WsResult<()>>),
    Id(oneshot::Sender<WsResult<String>>),
}

impl Reply {
    fn succeed(self, id: Option<String>) {
        match self {
            Reply::Unit(tx) => {
                let _ = tx.send(Ok(()));
            }
            Reply::Id(tx) => {
                let result = id.ok_or_else(|| {
                    WebSocketError::InvalidArgument("ack carried no session id".into())
                });
                let _ = tx.send(result);
            }
        }
    }

    fn fail(self, error: WebSocketError) {
        match self {
            Reply::Unit(tx) => {
                let _ = tx.send(Err(error));
            }
            Reply::Id(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Reply::Unit(tx) => tx.is_closed(),
            Reply::Id(tx) => tx.is_closed(),
        }
    }
}

pub(crate) struct PendingAck {
    request_id: u64,
    kind: AckKind,
    key: AckKey,
    reply: Reply,
    batch_size: u32,
}

/// Requests awaiting an ack, oldest first.
#[derive(Default)]
pub(crate) struct PendingAcks {
    entries: Vec<PendingAck>,
}

impl PendingAcks {
    fn insert(&mut self, request_id: u64, kind: AckKind, key: AckKey, reply: Reply) {
        self.insert_with_batch(request_id, kind, key, reply, 0);
    }

    fn insert_with_batch(
        &mut self,
        request_id: u64,
        kind: AckKind,
        key: AckKey,
        reply: Reply,
        batch_size: u32,
    ) {
        self.entries.push(PendingAck {
            request_id,
            kind,
            key,
            reply,
            batch_size,
        });
    }

    /// Take the request an ack answers: by echoed id, else the oldest of the same kind and key.
    fn take(&mut self, kind: AckKind, request_id: Option<u64>, key: &AckKey) -> Option<PendingAck> {
        let by_id = request_id.and_then(|id| {
            self.entries
                .iter()
                .position(|e| e.request_id == id && e.kind == kind)
        });
        let index = by_id.or_else(|| {
            self.entries
                .iter()
                .position(|e| e.kind == kind && &e.key == key)
        })?;
        Some(self.entries.remove(index))
    }

    fn take_by_id(&mut self, request_id: u64) -> Option<PendingAck> {
        let index = self.entries.iter().position(|e| e.request_id == request_id)?;
        Some(self.entries.remove(index))
    }

    /// Whether someone is still waiting on `request_id`.
    fn is_live(&self, request_id: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.request_id == request_id && !e.reply.is_closed())
    }

    /// Forget requests whose caller stopped waiting.
    fn prune_closed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.reply.is_closed());
        before - self.entries.len()
    }

    /// Take every request addressed to a replay or stream by id.
    fn take_for(&mut self, key: &AckKey) -> Vec<PendingAck> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| &e.key == key);
        self.entries = kept;
        taken
    }

    fn restore(&mut self, pending: PendingAck) {
        self.entries.push(pending);
    }

    fn drain(&mut self) -> Vec<PendingAck> {
        std::mem::take(&mut self.entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

/// Why the connected loop ended.
enum Disconnect {
    Close(Option<oneshot::Sender<()>>),
    Lost(WebSocketError),
}

enum Establish {
    Connected(Box<dyn Transport>),
    Failed(WebSocketError),
    Close(Option<oneshot::Sender<()>>),
}

pub(crate) struct SessionTask {
    options: WsOptions,
    connector: Arc<dyn Connector>,
    session: Session,
    registry: SubscriptionManager,
    replays: ReplayController,
    streams: StreamController,
    acks: PendingAcks,
    handler: Arc<dyn WsHandler>,
    cmd_rx: mpsc::Receiver<Command>,
    ids: RequestIds,
    ready: Option<oneshot::Sender<WsResult<()>>>,
}

impl SessionTask {
    pub(crate) fn new(
        options: WsOptions,
        connector: Arc<dyn Connector>,
        state: SharedState,
        ids: RequestIds,
        cmd_rx: mpsc::Receiver<Command>,
        ready: oneshot::Sender<WsResult<()>>,
    ) -> Self {
        Self {
            options,
            connector,
            session: Session::new(state),
            registry: SubscriptionManager::new(),
            replays: ReplayController::new(),
            streams: StreamController::new(),
            acks: PendingAcks::default(),
            handler: Arc::new(NoopHandler),
            cmd_rx,
            ids,
            ready: Some(ready),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let failure = match self.establish().await {
                Establish::Connected(mut transport) => {
                    self.session.reset_attempts();
                    self.set_state(ConnectionState::Connected);
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Ok(()));
                    }

                    let end = match self.on_connected(transport.as_mut()).await {
                        Ok(()) => self.run_connected(transport.as_mut()).await,
                        Err(e) => Disconnect::Lost(e),
                    };
                    match end {
                        Disconnect::Close(reply) => {
                            self.shutdown(Some(transport.as_mut()), reply).await;
                            return;
                        }
                        Disconnect::Lost(error) => {
                            let _ = transport.close().await;
                            self.on_connection_lost(&error);
                            error
                        }
                    }
                }
                Establish::Failed(error) => {
                    tracing::error!("WebSocket connection failed: {}", error);
                    self.handler.on_error(&error);
                    error
                }
                Establish::Close(reply) => {
                    self.shutdown(None, reply).await;
                    return;
                }
            };

            let attempt = self.session.record_failure();
            if !self.options.reconnect.allows(attempt) {
                self.fail_fatally(attempt - 1);
                return;
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.options.reconnect.delay(attempt);
            tracing::info!(
                "Reconnect attempt {}/{} in {}ms ({})",
                attempt,
                self.options.reconnect.max_attempts,
                delay.as_millis(),
                failure
            );
            if let Some(reply) = self.backoff(delay).await {
                self.shutdown(None, reply).await;
                return;
            }
        }
    }

    /// Open a transport while still serving commands offline.
    async fn establish(&mut self) -> Establish {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.options.endpoint.clone();
        let api_key = self.options.api_key.clone();
        let connect = connector.connect(&endpoint, api_key.as_ref());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(transport) => Establish::Connected(transport),
                        Err(error) => Establish::Failed(error),
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close { reply }) => return Establish::Close(Some(reply)),
                    Some(cmd) => {
                        let _ = self.handle_command(cmd, None).await;
                    }
                    None => return Establish::Close(None),
                }
            }
        }
    }

    /// Sleep before the next attempt. Returns the close request if one arrived.
    async fn backoff(&mut self, delay: Duration) -> Option<Option<oneshot::Sender<()>>> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return None,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close { reply }) => return Some(Some(reply)),
                    Some(cmd) => {
                        let _ = self.handle_command(cmd, None).await;
                    }
                    None => return Some(None),
                }
            }
        }
    }

    /// Resubscribe burst, then the offline queue in FIFO order.
    async fn on_connected(&mut self, transport: &mut dyn Transport) -> WsResult<()> {
        let ids = self.ids.clone();
        let burst = self.registry.resubscribe_commands(|| ids.next());
        if !burst.is_empty() {
            tracing::info!("Resubscribing to {} tracked subscription(s)", burst.len());
        }
        for command in &burst {
            send(transport, command).await?;
        }

        let queued = self.session.drain_pending();
        if !queued.is_empty() {
            tracing::info!("Flushing {} queued command(s)", queued.len());
        }
        let mut queued = queued.into_iter();
        while let Some(command) = queued.next() {
            if let Some(id) = command.request_id() {
                if !self.acks.is_live(id) {
                    tracing::debug!("Dropping queued {} request {}: caller gave up", command.operation(), id);
                    continue;
                }
            }
            if let Err(error) = send(transport, &command).await {
                self.session.enqueue(command);
                for rest in queued {
                    self.session.enqueue(rest);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// The inner connected loop, runs until the connection breaks or close is requested.
    async fn run_connected(&mut self, transport: &mut dyn Transport) -> Disconnect {
        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);
        heartbeat.reset();

        let far_future = tokio::time::Instant::now() + Duration::from_secs(86400 * 365);
        let pong_sleep = tokio::time::sleep_until(far_future);
        tokio::pin!(pong_sleep);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => {
                        if self.handle_frame(&text, transport).await {
                            awaiting_pong = false;
                            pong_sleep.as_mut().reset(far_future);
                        }
                    }
                    Some(Err(error)) => return Disconnect::Lost(error),
                    None => {
                        return Disconnect::Lost(WebSocketError::Transport(
                            "connection closed by server".into(),
                        ))
                    }
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close { reply }) => return Disconnect::Close(Some(reply)),
                    Some(cmd) => {
                        if let Err(error) = self.handle_command(cmd, Some(&mut *transport)).await {
                            return Disconnect::Lost(error);
                        }
                    }
                    None => return Disconnect::Close(None),
                },

                _ = heartbeat.tick() => {
                    let pruned = self.acks.prune_closed();
                    if pruned > 0 {
                        tracing::debug!("Pruned {} abandoned request(s)", pruned);
                    }
                    if let Err(error) = send(transport, &ClientCommand::Ping).await {
                        return Disconnect::Lost(error);
                    }
                    if !awaiting_pong {
                        awaiting_pong = true;
                        pong_sleep
                            .as_mut()
                            .reset(tokio::time::Instant::now() + self.options.pong_timeout);
                    }
                }

                () = &mut pong_sleep, if awaiting_pong => {
                    tracing::warn!(
                        "Pong timeout: no response within {}ms",
                        self.options.pong_timeout.as_millis()
                    );
                    return Disconnect::Lost(WebSocketError::PongTimeout);
                }
            }
        }
    }

    // ─── Commands ────────────────────────────────────────────────────────

    /// Execute one caller command. `transport` is `None` while offline.
    async fn handle_command(
        &mut self,
        cmd: Command,
        mut transport: Option<&mut dyn Transport>,
    ) -> WsResult<()> {
        match cmd {
            Command::Subscribe {
                request_id,
                subscription,
                reply,
            } => {
                let command = subscription.to_command(request_id);
                let key = AckKey::Feed(subscription.channel, subscription.symbol.clone());
                self.registry.register(subscription);
                match transport.as_deref_mut() {
                    Some(t) => {
                        self.acks
                            .insert(request_id, AckKind::Subscribe, key, Reply::Unit(reply));
                        send(t, &command).await?;
                    }
                    // carried by the resubscribe burst
                    None => {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Command::Unsubscribe {
                request_id,
                channel,
                symbol,
                reply,
            } => {
                if self.registry.remove(channel, &symbol).is_none() {
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                match transport.as_deref_mut() {
                    Some(t) => {
                        let command = ClientCommand::Unsubscribe {
                            id: request_id,
                            channel,
                            coin: symbol.clone(),
                        };
                        self.acks.insert(
                            request_id,
                            AckKind::Unsubscribe,
                            AckKey::Feed(channel, symbol),
                            Reply::Unit(reply),
                        );
                        send(t, &command).await?;
                    }
                    None => {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Command::StartReplay {
                request_id,
                channel,
                symbol,
                start,
                end,
                speed,
                reply,
            } => {
                let command = ClientCommand::Replay {
                    id: request_id,
                    channel,
                    coin: symbol.clone(),
                    start,
                    end,
                    speed,
                };
                self.acks.insert(
                    request_id,
                    AckKind::Replay,
                    AckKey::Feed(channel, symbol),
                    Reply::Id(reply),
                );
                self.send_or_queue(command, transport).await?;
            }
            Command::ControlReplay {
                request_id,
                action,
                replay_id,
                reply,
            } => {
                let (kind, command) = match action {
                    ReplayAction::Stop => {
                        if !self.replays.request_stop(&replay_id) {
                            tracing::debug!("Replay {} already stopped or unknown", replay_id);
                            let _ = reply.send(Ok(()));
                            return Ok(());
                        }
                        (
                            AckKind::ReplayStop,
                            ClientCommand::ReplayStop {
                                id: request_id,
                                replay_id: replay_id.clone(),
                            },
                        )
                    }
                    ReplayAction::Pause | ReplayAction::Resume => {
                        if let Err(error) = self.replays.ensure_controllable(&replay_id) {
                            let _ = reply.send(Err(error));
                            return Ok(());
                        }
                        if action == ReplayAction::Pause {
                            (
                                AckKind::ReplayPause,
                                ClientCommand::ReplayPause {
                                    id: request_id,
                                    replay_id: replay_id.clone(),
                                },
                            )
                        } else {
                            (
                                AckKind::ReplayResume,
                                ClientCommand::ReplayResume {
                                    id: request_id,
                                    replay_id: replay_id.clone(),
                                },
                            )
                        }
                    }
                };
                self.acks
                    .insert(request_id, kind, AckKey::Replay(replay_id), Reply::Unit(reply));
                self.send_or_queue(command, transport).await?;
            }
            Command::StartStream {
                request_id,
                channel,
                symbol,
                start,
                end,
                batch_size,
                reply,
            } => {
                let command = ClientCommand::Stream {
                    id: request_id,
                    channel,
                    coin: symbol.clone(),
                    start,
                    end,
                    batch_size,
                };
                self.acks.insert_with_batch(
                    request_id,
                    AckKind::Stream,
                    AckKey::Feed(channel, symbol),
                    Reply::Id(reply),
                    batch_size,
                );
                self.send_or_queue(command, transport).await?;
            }
            Command::StopStream {
                request_id,
                stream_id,
                reply,
            } => {
                if !self.streams.request_stop(&stream_id) {
                    tracing::debug!("Stream {} already stopped or unknown", stream_id);
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                let command = ClientCommand::StreamStop {
                    id: request_id,
                    stream_id: stream_id.clone(),
                };
                self.acks.insert(
                    request_id,
                    AckKind::StreamStop,
                    AckKey::Stream(stream_id),
                    Reply::Unit(reply),
                );
                self.send_or_queue(command, transport).await?;
            }
            Command::SetHandler(handler) => {
                self.handler = handler;
            }
            Command::Close { reply } => {
                // intercepted by the loops; reaching here means nothing to close
                let _ = reply.send(());
            }
        }
        Ok(())
    }

    async fn send_or_queue(
        &mut self,
        command: ClientCommand,
        transport: Option<&mut dyn Transport>,
    ) -> WsResult<()> {
        match transport {
            Some(t) => send(t, &command).await,
            None => {
                tracing::debug!("Queueing {} until connected", command.operation());
                self.session.enqueue(command);
                Ok(())
            }
        }
    }

    // ─── Frames ──────────────────────────────────────────────────────────

    /// Process one inbound frame. Returns `true` for a pong.
    async fn handle_frame(&mut self, text: &str, transport: &mut dyn Transport) -> bool {
        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!("Discarding frame: {}", error);
                self.handler.on_error(&WebSocketError::Decode(error));
                return false;
            }
        };

        match frame {
            Frame::Pong => return true,
            Frame::Subscribed(ack) => {
                let key = AckKey::Feed(ack.channel, ack.coin.clone());
                if let Some(pending) = self.acks.take(AckKind::Subscribe, ack.id, &key) {
                    pending.reply.succeed(None);
                }
                tracing::debug!("Subscribed to {}:{}", ack.channel, ack.coin);
            }
            Frame::Unsubscribed(ack) => {
                let key = AckKey::Feed(ack.channel, ack.coin.clone());
                if let Some(pending) = self.acks.take(AckKind::Unsubscribe, ack.id, &key) {
                    pending.reply.succeed(None);
                }
                tracing::debug!("Unsubscribed from {}:{}", ack.channel, ack.coin);
            }
            Frame::Error(payload) => {
                let error = WebSocketError::Server {
                    code: payload.code.clone(),
                    message: payload.message.clone(),
                    request_id: payload.id,
                };
                tracing::warn!("Server error: {}", payload.message);
                if let Some(pending) = payload.id.and_then(|id| self.acks.take_by_id(id)) {
                    if let (AckKind::Subscribe, AckKey::Feed(channel, symbol)) =
                        (pending.kind, &pending.key)
                    {
                        self.registry.remove(*channel, symbol);
                    }
                    pending.reply.fail(error.clone());
                }
                self.handler.on_error(&error);
            }
            Frame::Data(data) => {
                if self.registry.dispatch(&data) {
                    self.handler.on_data(&data);
                }
            }
            Frame::ReplayStarted(payload) => {
                let key = AckKey::Feed(payload.channel, payload.coin.clone());
                if let Some(pending) = self.acks.take(AckKind::Replay, payload.id, &key) {
                    pending.reply.succeed(Some(payload.replay_id.clone()));
                }
                let (event, superseded) = self.replays.on_started(&payload);
                if let Some(old) = superseded {
                    self.settle_ended(AckKey::Replay(old.replay_id.clone()));
                    let stop = ClientCommand::ReplayStop {
                        id: self.ids.next(),
                        replay_id: old.replay_id.clone(),
                    };
                    send_best_effort(transport, &stop).await;
                    self.handler.on_replay(&ReplayEvent::Cancelled {
                        replay_id: old.replay_id,
                        reason: CancelReason::Superseded,
                    });
                }
                tracing::info!("Replay {} started", payload.replay_id);
                self.handler.on_replay(&event);
            }
            Frame::ReplayPaused(payload) => {
                let key = AckKey::Replay(payload.replay_id.clone());
                if let Some(pending) = self.acks.take(AckKind::ReplayPause, payload.id, &key) {
                    pending.reply.succeed(None);
                }
                if let Some(event) = self.replays.on_paused(&payload) {
                    self.handler.on_replay(&event);
                }
            }
            Frame::ReplayResumed(payload) => {
                let key = AckKey::Replay(payload.replay_id.clone());
                if let Some(pending) = self.acks.take(AckKind::ReplayResume, payload.id, &key) {
                    pending.reply.succeed(None);
                }
                if let Some(event) = self.replays.on_resumed(&payload) {
                    self.handler.on_replay(&event);
                }
            }
            Frame::ReplayCompleted(payload) => {
                self.settle_ended(AckKey::Replay(payload.replay_id.clone()));
                if let Some(event) = self.replays.on_completed(&payload) {
                    tracing::info!("Replay {} completed", payload.replay_id);
                    self.handler.on_replay(&event);
                }
            }
            Frame::ReplayStopped(payload) => {
                let key = AckKey::Replay(payload.replay_id.clone());
                if let Some(pending) = self.acks.take(AckKind::ReplayStop, payload.id, &key) {
                    pending.reply.succeed(None);
                }
                self.settle_ended(key);
                if let Some(event) = self.replays.on_stopped(&payload) {
                    self.handler.on_replay(&event);
                }
            }
            Frame::HistoricalData(data) => {
                if self.replays.accepts(&data) {
                    self.handler.on_historical_data(&data);
                }
            }
            Frame::StreamStarted(payload) => {
                let key = AckKey::Feed(payload.channel, payload.coin.clone());
                let batch_size = match self.acks.take(AckKind::Stream, payload.id, &key) {
                    Some(pending) => {
                        let batch_size = pending.batch_size;
                        pending.reply.succeed(Some(payload.stream_id.clone()));
                        batch_size
                    }
                    None => 0,
                };
                let (event, superseded) = self.streams.on_started(&payload, batch_size);
                if let Some(old) = superseded {
                    self.settle_ended(AckKey::Stream(old.stream_id.clone()));
                    let stop = ClientCommand::StreamStop {
                        id: self.ids.next(),
                        stream_id: old.stream_id.clone(),
                    };
                    send_best_effort(transport, &stop).await;
                    self.handler.on_stream(&StreamEvent::Cancelled {
                        stream_id: old.stream_id,
                        reason: CancelReason::Superseded,
                    });
                }
                tracing::info!("Stream {} started", payload.stream_id);
                self.handler.on_stream(&event);
            }
            Frame::StreamProgress(payload) => {
                if let Some(progress) = self.streams.on_progress(&payload) {
                    self.handler.on_stream_progress(&progress);
                }
            }
            Frame::HistoricalBatch(batch) => match self.streams.on_batch(&batch) {
                BatchOutcome::Deliver { gap } => {
                    if let Some(gap) = gap {
                        self.handler.on_error(&gap);
                    }
                    self.handler.on_historical_batch(&batch);
                }
                BatchOutcome::Stale { .. } | BatchOutcome::Ignored => {}
            },
            Frame::StreamCompleted(payload) => {
                self.settle_ended(AckKey::Stream(payload.stream_id.clone()));
                if let Some(event) = self.streams.on_completed(&payload) {
                    tracing::info!("Stream {} completed", payload.stream_id);
                    self.handler.on_stream(&event);
                }
            }
            Frame::StreamStopped(payload) => {
                let key = AckKey::Stream(payload.stream_id.clone());
                if let Some(pending) = self.acks.take(AckKind::StreamStop, payload.id, &key) {
                    pending.reply.succeed(None);
                }
                self.settle_ended(key);
                if let Some(event) = self.streams.on_stopped(&payload) {
                    self.handler.on_stream(&event);
                }
            }
        }
        false
    }

    // ─── Lifecycle helpers ───────────────────────────────────────────────

    fn set_state(&mut self, to: ConnectionState) {
        match self.session.transition(to) {
            Ok(_) => self.handler.on_state_change(to),
            Err(error) => tracing::warn!("{}", error),
        }
    }

    /// Answer requests addressed to a replay or stream that just ended.
    ///
    /// A stop is already satisfied; pause and resume can no longer apply.
    fn settle_ended(&mut self, key: AckKey) {
        for pending in self.acks.take_for(&key) {
            match pending.kind {
                AckKind::ReplayStop | AckKind::StreamStop => pending.reply.succeed(None),
                kind => pending.reply.fail(WebSocketError::Cancelled {
                    operation: kind.operation(),
                }),
            }
        }
    }

    /// Server-side sessions die with the connection; in-flight requests are answered.
    fn on_connection_lost(&mut self, error: &WebSocketError) {
        tracing::warn!("WebSocket connection lost: {}", error);
        self.handler.on_error(error);

        for (_, event) in self.replays.cancel_all(CancelReason::ConnectionLost) {
            self.handler.on_replay(&event);
        }
        for (_, event) in self.streams.cancel_all(CancelReason::ConnectionLost) {
            self.handler.on_stream(&event);
        }

        let queued: HashSet<u64> = self.session.pending_request_ids().collect();
        for pending in self.acks.drain() {
            if queued.contains(&pending.request_id) {
                self.acks.restore(pending);
                continue;
            }
            match pending.kind {
                // the burst re-sends it; its ack resolves this by key
                AckKind::Subscribe => self.acks.restore(pending),
                AckKind::Unsubscribe => pending.reply.succeed(None),
                _ => pending.reply.fail(error.clone()),
            }
        }
    }

    /// Reconnect budget exhausted: the only fatal path.
    fn fail_fatally(&mut self, attempts: u32) {
        let error = WebSocketError::ReconnectExhausted { attempts };
        tracing::error!("{}", error);

        for (_, event) in self.replays.cancel_all(CancelReason::ConnectionLost) {
            self.handler.on_replay(&event);
        }
        for (_, event) in self.streams.cancel_all(CancelReason::ConnectionLost) {
            self.handler.on_stream(&event);
        }
        for pending in self.acks.drain() {
            pending.reply.fail(error.clone());
        }
        self.session.drain_pending();
        self.reject_remaining(WebSocketError::Closed);

        self.set_state(ConnectionState::Closed);
        self.handler.on_error(&error);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(error));
        }
    }

    /// Caller-initiated close.
    async fn shutdown(
        &mut self,
        mut transport: Option<&mut dyn Transport>,
        reply: Option<oneshot::Sender<()>>,
    ) {
        tracing::info!("Closing WebSocket session");
        self.set_state(ConnectionState::Closing);

        for (session, event) in self.replays.cancel_all(CancelReason::Closed) {
            if let Some(t) = transport.as_deref_mut() {
                let stop = ClientCommand::ReplayStop {
                    id: self.ids.next(),
                    replay_id: session.replay_id,
                };
                send_best_effort(t, &stop).await;
            }
            self.handler.on_replay(&event);
        }
        for (session, event) in self.streams.cancel_all(CancelReason::Closed) {
            if let Some(t) = transport.as_deref_mut() {
                let stop = ClientCommand::StreamStop {
                    id: self.ids.next(),
                    stream_id: session.stream_id,
                };
                send_best_effort(t, &stop).await;
            }
            self.handler.on_stream(&event);
        }

        if let Some(t) = transport {
            if let Err(error) = t.close().await {
                tracing::debug!("Error closing transport: {}", error);
            }
        }

        let cancelled = self.acks.len();
        for pending in self.acks.drain() {
            let operation = pending.kind.operation();
            pending.reply.fail(WebSocketError::Cancelled { operation });
        }
        if cancelled > 0 {
            tracing::debug!("Cancelled {} pending request(s)", cancelled);
        }
        self.session.drain_pending();
        self.reject_remaining(WebSocketError::Closed);

        self.set_state(ConnectionState::Closed);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(WebSocketError::Closed));
        }
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    fn reject_remaining(&mut self, error: WebSocketError) {
        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            cmd.reject(error.clone());
        }
    }
}

async fn send(transport: &mut dyn Transport, command: &ClientCommand) -> WsResult<()> {
    let text = codec::encode(command)?;
    transport.send(text).await
}

async fn send_best_effort(transport: &mut dyn Transport, command: &ClientCommand) {
    if let Err(error) = send(transport, command).await {
        tracing::debug!("Best-effort {} failed: {}", command.operation(), error);
    }
}
