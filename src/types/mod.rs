//! Market data types shared with the 0xarchive REST API.
//!
//! The WebSocket core never builds these on its own; it only deserializes
//! them out of `data` payloads (see [`crate::websocket::WsData::parse`]).

pub mod instrument;
pub mod market;
pub mod orderbook;
pub mod record;
pub mod trade;

pub use instrument::{Hip3Instrument, Instrument, LighterInstrument};
pub use market::{Candle, FundingRate, Liquidation, OpenInterest};
pub use orderbook::{OrderBook, PriceLevel};
pub use record::TimestampedRecord;
pub use trade::{Trade, TradeSide};
