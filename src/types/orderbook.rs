//! Order book types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::price::{midpoint, parse_decimal, spread_bps};
use crate::shared::timestamp::flexible;

/// Price level in the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price as decimal string
    pub px: String,
    /// Total size at this level as decimal string
    pub sz: String,
    /// Number of orders at this level
    #[serde(default)]
    pub n: u32,
}

impl PriceLevel {
    /// Price as a [`Decimal`].
    pub fn price(&self) -> Option<Decimal> {
        parse_decimal(&self.px)
    }

    /// Size as a [`Decimal`].
    pub fn size(&self) -> Option<Decimal> {
        parse_decimal(&self.sz)
    }
}

/// L2 order book snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Coin symbol (e.g. "BTC")
    pub coin: String,
    /// Snapshot time
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    /// Bid levels, best first
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    /// Mid price as decimal string, when the server computed it
    #[serde(default)]
    pub mid_price: Option<String>,
    /// Spread as decimal string
    #[serde(default)]
    pub spread: Option<String>,
    /// Spread in basis points as decimal string
    #[serde(default)]
    pub spread_bps: Option<String>,
}

impl OrderBook {
    /// Best bid level.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Mid price: the server's value when present, otherwise computed from the top of book.
    pub fn mid(&self) -> Option<Decimal> {
        if let Some(mid) = self.mid_price.as_deref().and_then(parse_decimal) {
            return Some(mid);
        }
        let bid = self.best_bid()?.price()?;
        let ask = self.best_ask()?.price()?;
        Some(midpoint(bid, ask))
    }

    /// Spread in basis points computed from the top of book.
    pub fn computed_spread_bps(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price()?;
        let ask = self.best_ask()?.price()?;
        spread_bps(bid, ask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orderbook_deserialization() {
        let json = r#"{
            "coin": "BTC",
            "timestamp": "2024-01-01T00:00:00Z",
            "bids": [{"px": "99.0", "sz": "1.5", "n": 3}],
            "asks": [{"px": "101.0", "sz": "0.5", "n": 1}]
        }"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.coin, "BTC");
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.best_ask().unwrap().n, 1);
        assert_eq!(book.mid(), Some(Decimal::from(100)));
        assert_eq!(book.computed_spread_bps(), Some(Decimal::from(200)));
    }

    #[test]
    fn test_server_mid_price_wins() {
        let json = r#"{
            "coin": "ETH",
            "timestamp": 1704067200000,
            "bids": [{"px": "10", "sz": "1"}],
            "asks": [{"px": "12", "sz": "1"}],
            "mid_price": "11.5"
        }"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.mid(), Some(Decimal::new(115, 1)));
    }

    #[test]
    fn test_empty_book_has_no_mid() {
        let json = r#"{"coin": "SOL", "timestamp": 0}"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert!(book.mid().is_none());
        assert!(book.best_bid().is_none());
    }
}
