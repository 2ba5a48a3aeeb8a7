//! Main WebSocket client implementation.
//!
//! [`OxArchiveWs`] is a thin handle: it validates arguments, assigns request
//! ids and forwards commands to the session task spawned by
//! [`connect`](OxArchiveWs::connect). Every method takes `&self`, so the client
//! can be shared behind an `Arc`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::shared::{Interval, Timestamp};
use crate::websocket::config::WsOptions;
use crate::websocket::connection::{Command, ReplayAction, RequestIds, SessionTask};
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::handlers::WsHandler;
use crate::websocket::session::{ConnectionState, SharedState};
use crate::websocket::subscriptions::{DataHandler, Subscription};
use crate::websocket::transport::{default_connector, Connector};
use crate::websocket::types::{SubscribeParams, WsChannel, WsData};

/// WebSocket client for 0xarchive live data, replay and bulk streams.
///
/// # Example
///
/// ```ignore
/// use oxarchive::websocket::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), WebSocketError> {
///     let client = OxArchiveWs::new(WsOptions::from_env())?;
///     client.connect().await?;
///
///     client
///         .subscribe(WsChannel::Orderbook, "BTC", |data| {
///             if let Ok(book) = data.parse::<oxarchive::types::OrderBook>() {
///                 println!("mid: {:?}", book.mid());
///             }
///         })
///         .await?;
///
///     tokio::signal::ctrl_c().await.ok();
///     client.close().await
/// }
/// ```
pub struct OxArchiveWs {
    options: WsOptions,
    connector: Arc<dyn Connector>,
    state: SharedState,
    ids: RequestIds,
    cmd_tx: mpsc::Sender<Command>,
    /// Receiver waiting for `connect()` to hand it to the session task
    startup: Mutex<Option<mpsc::Receiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OxArchiveWs {
    /// Create a client. Does not connect yet.
    ///
    /// Fails with [`WebSocketError::TransportUnavailable`] when no connector is
    /// configured and the `ws-native` feature is disabled.
    pub fn new(options: WsOptions) -> WsResult<Self> {
        let connector = options
            .connector
            .clone()
            .or_else(default_connector)
            .ok_or(WebSocketError::TransportUnavailable)?;
        validate(&options)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(options.command_channel_capacity);
        Ok(Self {
            options,
            connector,
            state: SharedState::new(ConnectionState::Disconnected),
            ids: RequestIds::new(),
            cmd_tx,
            startup: Mutex::new(Some(cmd_rx)),
            task: Mutex::new(None),
        })
    }

    /// Client with default options and the given API key.
    pub fn with_api_key(api_key: impl Into<String>) -> WsResult<Self> {
        Self::new(WsOptions::new(api_key))
    }

    pub fn options(&self) -> &WsOptions {
        &self.options
    }

    /// Connect to the server.
    ///
    /// Spawns the session task and resolves once the first connection is up.
    /// With auto-reconnect enabled, failed handshakes are retried before this
    /// returns; it fails only when the reconnect budget runs out or the client
    /// is closed meanwhile. Calling it again while the session runs is a no-op.
    pub async fn connect(&self) -> WsResult<()> {
        if self.state().is_terminal() {
            return Err(WebSocketError::Closed);
        }
        let Some(cmd_rx) = lock(&self.startup).take() else {
            return Ok(());
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = SessionTask::new(
            self.options.clone(),
            Arc::clone(&self.connector),
            self.state.clone(),
            self.ids.clone(),
            cmd_rx,
            ready_tx,
        );
        *lock(&self.task) = Some(tokio::spawn(task.run()));

        ready_rx.await.unwrap_or(Err(WebSocketError::Closed))
    }

    /// Close the session.
    ///
    /// Stops live replays and streams best-effort, closes the transport and
    /// fails every pending request with [`WebSocketError::Cancelled`]. The
    /// client cannot be reopened. Calling it again is a no-op.
    pub async fn close(&self) -> WsResult<()> {
        if self.state().is_terminal() {
            return Ok(());
        }

        let never_started = lock(&self.startup).take();
        if let Some(mut cmd_rx) = never_started {
            cmd_rx.close();
            while let Ok(cmd) = cmd_rx.try_recv() {
                cmd.reject(WebSocketError::Closed);
            }
            self.state.store(ConnectionState::Closed);
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Replace the session-wide event handler.
    ///
    /// May be called before `connect()`; the handler is installed before the
    /// first connection attempt.
    pub fn set_handler(&self, handler: Arc<dyn WsHandler>) -> WsResult<()> {
        if self.state().is_terminal() {
            return Err(WebSocketError::Closed);
        }
        self.cmd_tx
            .try_send(Command::SetHandler(handler))
            .map_err(map_try_send)
    }

    // ─── Subscriptions ───────────────────────────────────────────────────

    /// Subscribe to `channel` for `symbol`, delivering data to `handler`.
    ///
    /// Resolves when the server acknowledges. While the client is
    /// reconnecting, the subscription is recorded and resolves immediately;
    /// the next connection subscribes it.
    pub async fn subscribe<F>(&self, channel: WsChannel, symbol: &str, handler: F) -> WsResult<()>
    where
        F: Fn(&WsData) + Send + Sync + 'static,
    {
        self.subscribe_with_params(channel, symbol, SubscribeParams::default(), handler)
            .await
    }

    /// Subscribe with extra parameters (e.g. a candle interval).
    ///
    /// Subscribing again to the same (channel, symbol) replaces the previous
    /// params and handler.
    pub async fn subscribe_with_params<F>(
        &self,
        channel: WsChannel,
        symbol: &str,
        params: SubscribeParams,
        handler: F,
    ) -> WsResult<()>
    where
        F: Fn(&WsData) + Send + Sync + 'static,
    {
        check_params(channel, &params)?;
        let handler: DataHandler = Arc::new(handler);
        let subscription = Subscription::new(channel, check_symbol(symbol)?)
            .with_params(params)
            .with_handler(handler);
        self.request("subscribe", |request_id, reply| Command::Subscribe {
            request_id,
            subscription,
            reply,
        })
        .await
    }

    /// Subscribe without a per-subscription handler; data reaches
    /// [`WsHandler::on_data`] only.
    pub async fn subscribe_feed(
        &self,
        channel: WsChannel,
        symbol: &str,
        params: SubscribeParams,
    ) -> WsResult<()> {
        check_params(channel, &params)?;
        let subscription = Subscription::new(channel, check_symbol(symbol)?).with_params(params);
        self.request("subscribe", |request_id, reply| Command::Subscribe {
            request_id,
            subscription,
            reply,
        })
        .await
    }

    /// Order book for `symbol` on the configured exchange.
    pub async fn subscribe_orderbook<F>(&self, symbol: &str, handler: F) -> WsResult<()>
    where
        F: Fn(&WsData) + Send + Sync + 'static,
    {
        let channel = self.venue_channel(WsChannel::Orderbook)?;
        self.subscribe(channel, symbol, handler).await
    }

    /// Trades for `symbol` on the configured exchange.
    pub async fn subscribe_trades<F>(&self, symbol: &str, handler: F) -> WsResult<()>
    where
        F: Fn(&WsData) + Send + Sync + 'static,
    {
        let channel = self.venue_channel(WsChannel::Trades)?;
        self.subscribe(channel, symbol, handler).await
    }

    /// Candles for `symbol` at `interval` on the configured exchange.
    pub async fn subscribe_candles<F>(
        &self,
        symbol: &str,
        interval: Interval,
        handler: F,
    ) -> WsResult<()>
    where
        F: Fn(&WsData) + Send + Sync + 'static,
    {
        let channel = self.venue_channel(WsChannel::Candles)?;
        self.subscribe_with_params(channel, symbol, SubscribeParams::interval(interval), handler)
            .await
    }

    /// Remove the subscription for (channel, symbol).
    ///
    /// Unknown subscriptions are a no-op. Data that races the unsubscribe is
    /// dropped.
    pub async fn unsubscribe(&self, channel: WsChannel, symbol: &str) -> WsResult<()> {
        let symbol = channel.exchange().normalize_symbol(check_symbol(symbol)?);
        self.request("unsubscribe", |request_id, reply| Command::Unsubscribe {
            request_id,
            channel,
            symbol,
            reply,
        })
        .await
    }

    // ─── Replay ──────────────────────────────────────────────────────────

    /// Start a replay of `channel` for `symbol` from `start`, returning the replay id.
    ///
    /// `end` defaults to open-ended, `speed` to real time. Lifecycle changes
    /// arrive through [`WsHandler::on_replay`] and records through
    /// [`WsHandler::on_historical_data`]. A replay already running for the
    /// same (channel, symbol) is cancelled.
    pub async fn start_replay(
        &self,
        channel: WsChannel,
        symbol: &str,
        start: impl Into<Timestamp>,
        end: Option<Timestamp>,
        speed: Option<f64>,
    ) -> WsResult<String> {
        let symbol = channel.exchange().normalize_symbol(check_symbol(symbol)?);
        let start = to_millis(start.into(), "start")?;
        let end = end.map(|end| to_millis(end, "end")).transpose()?;
        if let Some(end) = end {
            if end < start {
                return Err(WebSocketError::InvalidArgument(
                    "replay end is before start".into(),
                ));
            }
        }
        if let Some(speed) = speed {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(WebSocketError::InvalidArgument(format!(
                    "replay speed must be positive, got {}",
                    speed
                )));
            }
        }

        self.request("replay", |request_id, reply| Command::StartReplay {
            request_id,
            channel,
            symbol,
            start,
            end,
            speed,
            reply,
        })
        .await
    }

    /// Pause a running replay. Resolves once the server confirms.
    pub async fn pause_replay(&self, replay_id: &str) -> WsResult<()> {
        self.control_replay(ReplayAction::Pause, replay_id, "replay.pause")
            .await
    }

    /// Resume a paused replay. Resolves once the server confirms.
    pub async fn resume_replay(&self, replay_id: &str) -> WsResult<()> {
        self.control_replay(ReplayAction::Resume, replay_id, "replay.resume")
            .await
    }

    /// Stop a replay.
    ///
    /// Stopping an unknown, finished or already-stopping replay is a no-op.
    pub async fn stop_replay(&self, replay_id: &str) -> WsResult<()> {
        self.control_replay(ReplayAction::Stop, replay_id, "replay.stop")
            .await
    }

    async fn control_replay(
        &self,
        action: ReplayAction,
        replay_id: &str,
        operation: &'static str,
    ) -> WsResult<()> {
        let replay_id = replay_id.to_string();
        self.request(operation, |request_id, reply| Command::ControlReplay {
            request_id,
            action,
            replay_id,
            reply,
        })
        .await
    }

    // ─── Streams ─────────────────────────────────────────────────────────

    /// Stream `[start, end]` of `channel` for `symbol` in batches, returning the stream id.
    ///
    /// Batches arrive through [`WsHandler::on_historical_batch`], progress
    /// through [`WsHandler::on_stream_progress`]. Sequence gaps are reported
    /// to [`WsHandler::on_error`] as [`WebSocketError::SequenceGap`] and the
    /// batch is still delivered.
    pub async fn start_stream(
        &self,
        channel: WsChannel,
        symbol: &str,
        start: impl Into<Timestamp>,
        end: impl Into<Timestamp>,
        batch_size: u32,
    ) -> WsResult<String> {
        let symbol = channel.exchange().normalize_symbol(check_symbol(symbol)?);
        let start = to_millis(start.into(), "start")?;
        let end = to_millis(end.into(), "end")?;
        if end < start {
            return Err(WebSocketError::InvalidArgument(
                "stream end is before start".into(),
            ));
        }
        if batch_size == 0 {
            return Err(WebSocketError::InvalidArgument(
                "batch_size must be at least 1".into(),
            ));
        }

        self.request("stream", |request_id, reply| Command::StartStream {
            request_id,
            channel,
            symbol,
            start,
            end,
            batch_size,
            reply,
        })
        .await
    }

    /// Stop a stream. Unknown or finished streams are a no-op.
    pub async fn stop_stream(&self, stream_id: &str) -> WsResult<()> {
        let stream_id = stream_id.to_string();
        self.request("stream.stop", |request_id, reply| Command::StopStream {
            request_id,
            stream_id,
            reply,
        })
        .await
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    /// Send a command and wait for its reply within the ack timeout.
    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(u64, oneshot::Sender<WsResult<T>>) -> Command,
    ) -> WsResult<T> {
        match self.state() {
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(WebSocketError::Closed)
            }
            ConnectionState::Disconnected => return Err(WebSocketError::NotConnected),
            _ => {}
        }

        let request_id = self.ids.next();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .try_send(build(request_id, reply_tx))
            .map_err(map_try_send)?;

        match tokio::time::timeout(self.options.ack_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WebSocketError::Closed),
            Err(_) => {
                tracing::warn!("{} request {} timed out", operation, request_id);
                Err(WebSocketError::AckTimeout {
                    operation,
                    request_id,
                })
            }
        }
    }

    fn venue_channel(&self, channel: WsChannel) -> WsResult<WsChannel> {
        channel.on(self.options.exchange).ok_or_else(|| {
            WebSocketError::InvalidArgument(format!(
                "{} is not available on {}",
                channel, self.options.exchange
            ))
        })
    }
}

impl Drop for OxArchiveWs {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for OxArchiveWs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OxArchiveWs")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

fn validate(options: &WsOptions) -> WsResult<()> {
    if !(options.endpoint.starts_with("ws://") || options.endpoint.starts_with("wss://")) {
        return Err(WebSocketError::InvalidUrl(options.endpoint.clone()));
    }
    if options.heartbeat_interval.is_zero() || options.pong_timeout.is_zero() {
        return Err(WebSocketError::InvalidArgument(
            "heartbeat interval and pong timeout must be non-zero".into(),
        ));
    }
    if options.ack_timeout.is_zero() {
        return Err(WebSocketError::InvalidArgument(
            "ack timeout must be non-zero".into(),
        ));
    }
    if options.command_channel_capacity == 0 {
        return Err(WebSocketError::InvalidArgument(
            "command channel capacity must be non-zero".into(),
        ));
    }
    Ok(())
}

fn check_symbol(symbol: &str) -> WsResult<&str> {
    if symbol.trim().is_empty() {
        return Err(WebSocketError::InvalidArgument("symbol is empty".into()));
    }
    Ok(symbol)
}

/// Candle channels need an interval; no other channel takes one.
fn check_params(channel: WsChannel, params: &SubscribeParams) -> WsResult<()> {
    match (channel.takes_interval(), params.interval) {
        (true, None) => Err(WebSocketError::InvalidArgument(format!(
            "{} requires a candle interval",
            channel
        ))),
        (false, Some(interval)) => Err(WebSocketError::InvalidArgument(format!(
            "{} does not take an interval (got {})",
            channel, interval
        ))),
        _ => Ok(()),
    }
}

fn to_millis(timestamp: Timestamp, field: &str) -> WsResult<i64> {
    timestamp.to_millis().ok_or_else(|| {
        WebSocketError::InvalidArgument(format!("unparseable {} timestamp: {:?}", field, timestamp))
    })
}

fn map_try_send<T>(error: mpsc::error::TrySendError<T>) -> WebSocketError {
    match error {
        mpsc::error::TrySendError::Full(_) => {
            WebSocketError::SendFailed("Command channel full".into())
        }
        mpsc::error::TrySendError::Closed(_) => WebSocketError::Closed,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
