//! Message types for the 0xarchive WebSocket protocol.
//!
//! This module contains all command (client → server) and frame
//! (server → client) types, plus the events handed to caller handlers.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::shared::{Exchange, Interval};
use crate::types::TimestampedRecord;

// ============================================================================
// CHANNELS
// ============================================================================

/// A named data feed, subscribable per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsChannel {
    Orderbook,
    Trades,
    Candles,
    Liquidations,
    OpenInterest,
    Funding,
    Ticker,
    AllTickers,
    LighterOrderbook,
    LighterTrades,
    LighterCandles,
    LighterOpenInterest,
    LighterFunding,
    Hip3Orderbook,
    Hip3Trades,
    Hip3Candles,
    Hip3OpenInterest,
    Hip3Funding,
}

impl WsChannel {
    /// Wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orderbook => "orderbook",
            Self::Trades => "trades",
            Self::Candles => "candles",
            Self::Liquidations => "liquidations",
            Self::OpenInterest => "open_interest",
            Self::Funding => "funding",
            Self::Ticker => "ticker",
            Self::AllTickers => "all_tickers",
            Self::LighterOrderbook => "lighter_orderbook",
            Self::LighterTrades => "lighter_trades",
            Self::LighterCandles => "lighter_candles",
            Self::LighterOpenInterest => "lighter_open_interest",
            Self::LighterFunding => "lighter_funding",
            Self::Hip3Orderbook => "hip3_orderbook",
            Self::Hip3Trades => "hip3_trades",
            Self::Hip3Candles => "hip3_candles",
            Self::Hip3OpenInterest => "hip3_open_interest",
            Self::Hip3Funding => "hip3_funding",
        }
    }

    /// Venue this channel belongs to.
    pub fn exchange(&self) -> Exchange {
        match self {
            Self::LighterOrderbook
            | Self::LighterTrades
            | Self::LighterCandles
            | Self::LighterOpenInterest
            | Self::LighterFunding => Exchange::Lighter,
            Self::Hip3Orderbook
            | Self::Hip3Trades
            | Self::Hip3Candles
            | Self::Hip3OpenInterest
            | Self::Hip3Funding => Exchange::Hip3,
            _ => Exchange::Hyperliquid,
        }
    }

    /// The same feed on another venue, if that venue serves it.
    ///
    /// `WsChannel::Orderbook.on(Exchange::Lighter)` is `Some(LighterOrderbook)`;
    /// liquidations and tickers exist only on Hyperliquid.
    pub fn on(&self, exchange: Exchange) -> Option<WsChannel> {
        use WsChannel::*;
        let base = match self {
            LighterOrderbook | Hip3Orderbook => Orderbook,
            LighterTrades | Hip3Trades => Trades,
            LighterCandles | Hip3Candles => Candles,
            LighterOpenInterest | Hip3OpenInterest => OpenInterest,
            LighterFunding | Hip3Funding => Funding,
            other => *other,
        };
        match (exchange, base) {
            (Exchange::Hyperliquid, base) => Some(base),
            (Exchange::Lighter, Orderbook) => Some(LighterOrderbook),
            (Exchange::Lighter, Trades) => Some(LighterTrades),
            (Exchange::Lighter, Candles) => Some(LighterCandles),
            (Exchange::Lighter, OpenInterest) => Some(LighterOpenInterest),
            (Exchange::Lighter, Funding) => Some(LighterFunding),
            (Exchange::Hip3, Orderbook) => Some(Hip3Orderbook),
            (Exchange::Hip3, Trades) => Some(Hip3Trades),
            (Exchange::Hip3, Candles) => Some(Hip3Candles),
            (Exchange::Hip3, OpenInterest) => Some(Hip3OpenInterest),
            (Exchange::Hip3, Funding) => Some(Hip3Funding),
            _ => None,
        }
    }

    /// Whether the channel takes a candle interval parameter.
    pub fn takes_interval(&self) -> bool {
        matches!(self, Self::Candles | Self::LighterCandles | Self::Hip3Candles)
    }
}

impl std::fmt::Display for WsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WsChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown channel: {}", s))
    }
}

/// Extra subscription parameters beyond (channel, symbol).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// Candle interval for candle channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
}

impl SubscribeParams {
    /// Params for a candle subscription.
    pub fn interval(interval: Interval) -> Self {
        Self {
            interval: Some(interval),
        }
    }
}

// ============================================================================
// COMMAND TYPES (Client → Server)
// ============================================================================

/// Commands sent to the server, tagged by `op`.
///
/// Every command except `ping` carries a client request id, echoed back by
/// the matching ack frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op")]
pub enum ClientCommand {
    #[serde(rename = "subscribe")]
    Subscribe {
        id: u64,
        channel: WsChannel,
        coin: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        interval: Option<Interval>,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        id: u64,
        channel: WsChannel,
        coin: String,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "replay")]
    Replay {
        id: u64,
        channel: WsChannel,
        coin: String,
        start: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        end: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
    },
    #[serde(rename = "replay.pause")]
    ReplayPause { id: u64, replay_id: String },
    #[serde(rename = "replay.resume")]
    ReplayResume { id: u64, replay_id: String },
    #[serde(rename = "replay.stop")]
    ReplayStop { id: u64, replay_id: String },
    #[serde(rename = "stream")]
    Stream {
        id: u64,
        channel: WsChannel,
        coin: String,
        start: i64,
        end: i64,
        batch_size: u32,
    },
    #[serde(rename = "stream.stop")]
    StreamStop { id: u64, stream_id: String },
}

impl ClientCommand {
    /// Client request id, if the command carries one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Ping => None,
            Self::Subscribe { id, .. }
            | Self::Unsubscribe { id, .. }
            | Self::Replay { id, .. }
            | Self::ReplayPause { id, .. }
            | Self::ReplayResume { id, .. }
            | Self::ReplayStop { id, .. }
            | Self::Stream { id, .. }
            | Self::StreamStop { id, .. } => Some(*id),
        }
    }

    /// Operation name, used in logs and error values.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
            Self::Replay { .. } => "replay",
            Self::ReplayPause { .. } => "replay.pause",
            Self::ReplayResume { .. } => "replay.resume",
            Self::ReplayStop { .. } => "replay.stop",
            Self::Stream { .. } => "stream",
            Self::StreamStop { .. } => "stream.stop",
        }
    }

    /// Whether this command only changes live subscription state.
    ///
    /// Such commands are not queued while offline: the resubscribe burst on the
    /// next connection already reflects them.
    pub fn is_subscription_change(&self) -> bool {
        matches!(self, Self::Subscribe { .. } | Self::Unsubscribe { .. })
    }
}

// ============================================================================
// FRAME TYPES (Server → Client)
// ============================================================================

/// Inbound frame, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribed(SubscriptionAck),
    Unsubscribed(SubscriptionAck),
    Pong,
    Error(ErrorPayload),
    Data(WsData),
    ReplayStarted(ReplayStartedPayload),
    ReplayPaused(ReplayAckPayload),
    ReplayResumed(ReplayAckPayload),
    ReplayCompleted(ReplayCompletedPayload),
    ReplayStopped(ReplayAckPayload),
    HistoricalData(HistoricalData),
    StreamStarted(StreamStartedPayload),
    StreamProgress(StreamProgressPayload),
    HistoricalBatch(HistoricalBatch),
    StreamCompleted(StreamEndPayload),
    StreamStopped(StreamEndPayload),
}

impl Frame {
    /// Wire tag of this frame.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Subscribed(_) => "subscribed",
            Self::Unsubscribed(_) => "unsubscribed",
            Self::Pong => "pong",
            Self::Error(_) => "error",
            Self::Data(_) => "data",
            Self::ReplayStarted(_) => "replay_started",
            Self::ReplayPaused(_) => "replay_paused",
            Self::ReplayResumed(_) => "replay_resumed",
            Self::ReplayCompleted(_) => "replay_completed",
            Self::ReplayStopped(_) => "replay_stopped",
            Self::HistoricalData(_) => "historical_data",
            Self::StreamStarted(_) => "stream_started",
            Self::StreamProgress(_) => "stream_progress",
            Self::HistoricalBatch(_) => "historical_batch",
            Self::StreamCompleted(_) => "stream_completed",
            Self::StreamStopped(_) => "stream_stopped",
        }
    }
}

/// Ack for subscribe / unsubscribe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionAck {
    #[serde(default)]
    pub id: Option<u64>,
    pub channel: WsChannel,
    pub coin: String,
}

/// Error frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Live data push for a subscription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WsData {
    pub channel: WsChannel,
    pub coin: String,
    pub data: serde_json::Value,
}

impl WsData {
    /// Deserialize the payload into a typed value
    /// (e.g. [`OrderBook`](crate::types::OrderBook), `Vec<Trade>`).
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayStartedPayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub replay_id: String,
    pub channel: WsChannel,
    pub coin: String,
    pub start: i64,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

/// Ack for replay pause / resume / stop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayAckPayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub replay_id: String,
    #[serde(default)]
    pub current_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayCompletedPayload {
    pub replay_id: String,
    #[serde(default, alias = "snapshots_sent")]
    pub records_sent: Option<u64>,
}

/// One replayed record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoricalData {
    pub replay_id: String,
    pub channel: WsChannel,
    pub coin: String,
    /// Unix milliseconds of the original event
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl HistoricalData {
    /// Deserialize the payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamStartedPayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub stream_id: String,
    pub channel: WsChannel,
    pub coin: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamProgressPayload {
    pub stream_id: String,
    #[serde(alias = "snapshots_sent")]
    pub records_sent: u64,
    #[serde(default)]
    pub total: Option<u64>,
}

/// A sequenced slice of historical records.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoricalBatch {
    pub stream_id: String,
    pub channel: WsChannel,
    pub coin: String,
    pub sequence: u64,
    #[serde(alias = "data")]
    pub records: Vec<TimestampedRecord>,
}

/// Terminal stream frame (completed or stopped).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEndPayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub stream_id: String,
    #[serde(default, alias = "snapshots_sent")]
    pub records_sent: Option<u64>,
}

// ============================================================================
// CLIENT EVENTS
// ============================================================================

/// Why a replay or stream ended without a server terminal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A newer session for the same (channel, symbol) replaced it
    Superseded,
    /// The connection dropped; server-side state is gone
    ConnectionLost,
    /// The client was closed
    Closed,
}

/// Replay lifecycle, as confirmed by server acks.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    Started {
        replay_id: String,
        channel: WsChannel,
        symbol: String,
        start: i64,
        end: Option<i64>,
    },
    Paused {
        replay_id: String,
        current_timestamp: Option<i64>,
    },
    Resumed {
        replay_id: String,
        current_timestamp: Option<i64>,
    },
    Completed {
        replay_id: String,
        records_sent: Option<u64>,
    },
    Stopped {
        replay_id: String,
    },
    Cancelled {
        replay_id: String,
        reason: CancelReason,
    },
}

/// Stream lifecycle, as confirmed by server acks.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Started {
        stream_id: String,
        channel: WsChannel,
        symbol: String,
        start: i64,
        end: i64,
    },
    Completed {
        stream_id: String,
        records_delivered: u64,
    },
    Stopped {
        stream_id: String,
        records_delivered: u64,
    },
    Cancelled {
        stream_id: String,
        reason: CancelReason,
    },
}

/// Cumulative progress of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProgress {
    pub stream_id: String,
    /// Records delivered to the caller so far
    pub records_delivered: u64,
    /// Records the server reports as sent
    pub records_sent: u64,
    /// Total records in range, when the server knows it
    pub total: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(
            serde_json::to_string(&WsChannel::OpenInterest).unwrap(),
            "\"open_interest\""
        );
        assert_eq!("lighter_orderbook".parse::<WsChannel>(), Ok(WsChannel::LighterOrderbook));
        assert!("nope".parse::<WsChannel>().is_err());
        assert_eq!(WsChannel::Hip3Trades.to_string(), "hip3_trades");
    }

    #[test]
    fn test_channel_on_exchange() {
        assert_eq!(
            WsChannel::Orderbook.on(Exchange::Lighter),
            Some(WsChannel::LighterOrderbook)
        );
        assert_eq!(
            WsChannel::Hip3Candles.on(Exchange::Hyperliquid),
            Some(WsChannel::Candles)
        );
        assert_eq!(WsChannel::Liquidations.on(Exchange::Hip3), None);
        assert_eq!(WsChannel::LighterFunding.exchange(), Exchange::Lighter);
        assert!(WsChannel::Hip3Candles.takes_interval());
    }

    #[test]
    fn test_command_request_ids() {
        let cmd = ClientCommand::ReplayStop {
            id: 9,
            replay_id: "r1".into(),
        };
        assert_eq!(cmd.request_id(), Some(9));
        assert_eq!(cmd.operation(), "replay.stop");
        assert_eq!(ClientCommand::Ping.request_id(), None);
        assert!(ClientCommand::Unsubscribe {
            id: 1,
            channel: WsChannel::Trades,
            coin: "BTC".into()
        }
        .is_subscription_change());
    }

    #[test]
    fn test_ws_data_parse_trades() {
        let data = WsData {
            channel: WsChannel::Trades,
            coin: "ETH".into(),
            data: serde_json::json!([{
                "coin": "ETH",
                "side": "A",
                "price": "2000",
                "size": "1",
                "timestamp": 1704067200000i64
            }]),
        };
        let trades: Vec<crate::types::Trade> = data.parse().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].coin, "ETH");
    }
}
