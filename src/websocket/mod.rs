//! WebSocket client module for 0xarchive.
//!
//! One connection carries three kinds of traffic:
//! - live subscriptions to real-time channels (order book, trades, candles, ...)
//! - replays of historical data at a chosen speed, with pause/resume/stop
//! - bulk streams of historical data in sequenced batches
//!
//! The connection is owned by a background task. It reconnects with
//! exponential backoff, resubscribes every tracked subscription once per
//! connection, keeps the link alive with heartbeats and correlates server
//! acks with the request that caused them.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxarchive::websocket::{OxArchiveWs, WsChannel, WsOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OxArchiveWs::new(WsOptions::new("your-api-key"))?;
//!     client.connect().await?;
//!
//!     client
//!         .subscribe(WsChannel::Trades, "BTC", |data| {
//!             println!("{} {}: {}", data.channel, data.coin, data.data);
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Replay and streams
//!
//! Lifecycle events arrive through a [`WsHandler`]. [`EventForwarder`] turns
//! them into a channel of [`WsEvent`]s:
//!
//! ```rust,ignore
//! use oxarchive::websocket::{EventForwarder, StreamEvent, WsEvent};
//!
//! let (forwarder, mut events) = EventForwarder::channel();
//! client.set_handler(forwarder)?;
//!
//! let stream_id = client
//!     .start_stream(WsChannel::Trades, "ETH", 1_700_000_000_000i64, 1_700_003_600_000i64, 1000)
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         WsEvent::HistoricalBatch(batch) => println!("batch {}", batch.sequence),
//!         WsEvent::Stream(StreamEvent::Completed { .. }) => break,
//!         WsEvent::Error(e) => eprintln!("{}", e),
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub(crate) mod connection;
pub mod error;
pub mod handlers;
pub mod replay;
pub mod session;
pub mod stream;
pub mod subscriptions;
pub mod transport;
pub mod types;

pub use client::OxArchiveWs;
pub use codec::{decode, encode, FrameType};
pub use config::WsOptions;
pub use error::{DecodeError, WebSocketError, WsResult};
pub use handlers::{EventForwarder, NoopHandler, WsEvent, WsHandler};
pub use replay::{ReplayController, ReplaySession, ReplayState};
pub use session::{ConnectionState, ReconnectPolicy, Session, SharedState};
pub use stream::{BatchOutcome, StreamController, StreamSession};
pub use subscriptions::{DataHandler, Subscription, SubscriptionManager};
pub use transport::{default_connector, Connector, Transport};
#[cfg(feature = "ws-native")]
pub use transport::TungsteniteConnector;
pub use types::*;
