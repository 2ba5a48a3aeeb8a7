//! # 0xarchive Rust SDK
//!
//! A Rust SDK for the 0xarchive market data WebSocket.
//!
//! ## Modules
//!
//! - [`websocket`]: Live subscriptions, historical replay and bulk streams over one connection
//! - [`types`]: Market data records carried in `data` payloads
//! - [`shared`]: Exchanges, intervals, timestamps and decimal helpers
//! - [`network`]: Endpoint constants
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use oxarchive::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OxArchiveWs::new(WsOptions::from_env())?;
//!     client.connect().await?;
//!
//!     client
//!         .subscribe_orderbook("BTC", |data| {
//!             if let Ok(book) = data.parse::<OrderBook>() {
//!                 println!("best bid: {:?}", book.best_bid());
//!             }
//!         })
//!         .await?;
//!
//!     let replay_id = client
//!         .start_replay(WsChannel::Trades, "ETH", "2024-01-01T00:00:00Z", None, Some(10.0))
//!         .await?;
//!     println!("replay {} started", replay_id);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Shared utilities and types.
pub mod shared;

/// Market data types.
pub mod types;

/// Network URL constants (API and WebSocket endpoints).
pub mod network;

/// WebSocket client for live, replay and stream data.
pub mod websocket;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use oxarchive::prelude::*;
/// ```
pub mod prelude {
    // Network constants
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};

    // Shared utilities
    pub use crate::shared::{Exchange, Interval, Timestamp};

    // Market data
    pub use crate::types::{
        Candle, FundingRate, Liquidation, OpenInterest, OrderBook, PriceLevel, Trade, TradeSide,
    };

    // WebSocket module exports
    pub use crate::websocket::{
        CancelReason, ConnectionState, EventForwarder, HistoricalBatch, HistoricalData,
        NoopHandler, OxArchiveWs, ReconnectPolicy, ReplayEvent, StreamEvent, StreamProgress,
        SubscribeParams, WebSocketError, WsChannel, WsData, WsEvent, WsHandler, WsOptions,
        WsResult,
    };
}
