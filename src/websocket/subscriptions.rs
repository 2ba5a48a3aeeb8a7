//! Subscription management for WebSocket channels.
//!
//! Tracks active subscriptions in registration order, routes live data frames
//! to their handlers and rebuilds the subscribe burst after a reconnect.

use std::fmt;
use std::sync::Arc;

use crate::websocket::types::{ClientCommand, SubscribeParams, WsChannel, WsData};

/// Per-subscription data callback.
pub type DataHandler = Arc<dyn Fn(&WsData) + Send + Sync>;

/// Represents a subscription to one (channel, symbol) feed
#[derive(Clone)]
pub struct Subscription {
    pub channel: WsChannel,
    /// Symbol as sent on the wire (already normalized for the channel's venue)
    pub symbol: String,
    pub params: SubscribeParams,
    handler: Option<DataHandler>,
}

impl Subscription {
    pub fn new(channel: WsChannel, symbol: impl Into<String>) -> Self {
        let symbol = channel.exchange().normalize_symbol(&symbol.into());
        Self {
            channel,
            symbol,
            params: SubscribeParams::default(),
            handler: None,
        }
    }

    pub fn with_params(mut self, params: SubscribeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_handler(mut self, handler: DataHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn matches(&self, channel: WsChannel, symbol: &str) -> bool {
        self.channel == channel && self.symbol == symbol
    }

    /// Build the subscribe command for this subscription.
    pub fn to_command(&self, id: u64) -> ClientCommand {
        ClientCommand::Subscribe {
            id,
            channel: self.channel,
            coin: self.symbol.clone(),
            interval: self.params.interval,
        }
    }

    fn deliver(&self, data: &WsData) {
        if let Some(handler) = &self.handler {
            handler(data);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("symbol", &self.symbol)
            .field("params", &self.params)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Manages active subscriptions
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionManager {
    /// Create a new subscription manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    ///
    /// An existing entry for the same (channel, symbol) is replaced in place
    /// and keeps its position. Returns `true` if the key was new.
    pub fn register(&mut self, subscription: Subscription) -> bool {
        match self
            .subscriptions
            .iter_mut()
            .find(|s| s.matches(subscription.channel, &subscription.symbol))
        {
            Some(existing) => {
                tracing::debug!(
                    "Replacing subscription {}:{}",
                    subscription.channel,
                    subscription.symbol
                );
                *existing = subscription;
                false
            }
            None => {
                tracing::debug!(
                    "Tracking subscription {}:{}",
                    subscription.channel,
                    subscription.symbol
                );
                self.subscriptions.push(subscription);
                true
            }
        }
    }

    /// Remove the subscription for (channel, symbol), if any.
    pub fn remove(&mut self, channel: WsChannel, symbol: &str) -> Option<Subscription> {
        let index = self
            .subscriptions
            .iter()
            .position(|s| s.matches(channel, symbol))?;
        Some(self.subscriptions.remove(index))
    }

    pub fn get(&self, channel: WsChannel, symbol: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.matches(channel, symbol))
    }

    pub fn is_subscribed(&self, channel: WsChannel, symbol: &str) -> bool {
        self.get(channel, symbol).is_some()
    }

    /// Route a data frame to its subscription.
    ///
    /// Returns `false` when nothing is subscribed for the frame's key; the
    /// server may still push data briefly after an unsubscribe.
    pub fn dispatch(&self, data: &WsData) -> bool {
        let symbol = data.channel.exchange().normalize_symbol(&data.coin);
        match self.get(data.channel, &symbol) {
            Some(subscription) => {
                subscription.deliver(data);
                true
            }
            None => {
                tracing::debug!("Dropping data for {}:{} (not subscribed)", data.channel, data.coin);
                false
            }
        }
    }

    /// Subscribe commands for every active subscription, in registration order.
    pub fn resubscribe_commands(&self, mut next_id: impl FnMut() -> u64) -> Vec<ClientCommand> {
        self.subscriptions
            .iter()
            .map(|s| s.to_command(next_id()))
            .collect()
    }

    /// Active subscriptions, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
