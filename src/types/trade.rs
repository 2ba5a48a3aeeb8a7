//! Trade types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::price::parse_decimal;
use crate::shared::timestamp::flexible;

/// Aggressor side of a trade ("A" = ask/sell, "B" = bid/buy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "A", alias = "sell", alias = "ask")]
    Sell,
    #[serde(rename = "B", alias = "buy", alias = "bid")]
    Buy,
}

/// Executed trade / fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Coin symbol
    pub coin: String,
    /// Aggressor side
    pub side: TradeSide,
    /// Price as decimal string
    pub price: String,
    /// Size as decimal string
    pub size: String,
    /// Execution time
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub trade_id: Option<i64>,
    #[serde(default)]
    pub order_id: Option<i64>,
    /// Whether the fill crossed the spread (taker)
    #[serde(default)]
    pub crossed: Option<bool>,
    #[serde(default)]
    pub fee: Option<String>,
    #[serde(default)]
    pub fee_token: Option<String>,
    #[serde(default)]
    pub closed_pnl: Option<String>,
    /// e.g. "Open Long", "Close Short"
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub user_address: Option<String>,
}

impl Trade {
    /// Price as a [`Decimal`].
    pub fn price_decimal(&self) -> Option<Decimal> {
        parse_decimal(&self.price)
    }

    /// Size as a [`Decimal`].
    pub fn size_decimal(&self) -> Option<Decimal> {
        parse_decimal(&self.size)
    }

    /// Notional value (price * size).
    pub fn notional(&self) -> Option<Decimal> {
        Some(self.price_decimal()? * self.size_decimal()?)
    }
}
