//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::network::{API_KEY_ENV, DEFAULT_WS_URL, WS_URL_ENV};
use crate::shared::Exchange;
use crate::websocket::session::ReconnectPolicy;
use crate::websocket::transport::Connector;

/// Options for [`OxArchiveWs`](crate::websocket::OxArchiveWs).
///
/// Defaults:
/// - endpoint: `wss://api.0xarchive.io/ws`
/// - heartbeat every 30s, pong expected within 10s
/// - acks expected within 10s
/// - command channel capacity 256
#[derive(Clone)]
pub struct WsOptions {
    pub endpoint: String,
    /// API key sent in the handshake
    pub api_key: Option<SecretString>,
    /// Venue used to pick channel names and normalize symbols
    pub exchange: Exchange,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub ack_timeout: Duration,
    pub command_channel_capacity: usize,
    /// Overrides the compiled-in transport
    pub connector: Option<Arc<dyn Connector>>,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_WS_URL.to_string(),
            api_key: None,
            exchange: Exchange::default(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            command_channel_capacity: 256,
            connector: None,
        }
    }
}

impl WsOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::default().with_api_key(api_key)
    }

    /// Read `OXARCHIVE_API_KEY` and `OXARCHIVE_WS_URL`; unset variables keep defaults.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                options = options.with_api_key(key.trim());
            }
        }
        if let Ok(url) = std::env::var(WS_URL_ENV) {
            if !url.trim().is_empty() {
                options = options.with_endpoint(url.trim());
            }
        }
        options
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

impl fmt::Debug for WsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsOptions")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("exchange", &self.exchange)
            .field("reconnect", &self.reconnect)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("pong_timeout", &self.pong_timeout)
            .field("ack_timeout", &self.ack_timeout)
            .field("command_channel_capacity", &self.command_channel_capacity)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}
