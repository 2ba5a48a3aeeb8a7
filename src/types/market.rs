//! Funding, open interest, candle and liquidation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::timestamp::flexible;
use crate::types::trade::TradeSide;

/// Funding rate observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub coin: String,
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    /// Funding rate as decimal string
    pub funding_rate: String,
    #[serde(default)]
    pub premium: Option<String>,
}

/// Open interest observation with mark/oracle context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub coin: String,
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    /// Open interest as decimal string
    pub open_interest: String,
    #[serde(default)]
    pub mark_price: Option<String>,
    #[serde(default)]
    pub oracle_price: Option<String>,
    #[serde(default)]
    pub day_ntl_volume: Option<String>,
    #[serde(default)]
    pub prev_day_price: Option<String>,
    #[serde(default)]
    pub mid_price: Option<String>,
    #[serde(default)]
    pub impact_bid_price: Option<String>,
    #[serde(default)]
    pub impact_ask_price: Option<String>,
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    #[serde(default)]
    pub quote_volume: Option<String>,
    #[serde(default)]
    pub trade_count: Option<u64>,
}

/// Liquidation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub coin: String,
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    pub liquidated_user: String,
    #[serde(default)]
    pub liquidator_user: Option<String>,
    pub price: String,
    pub size: String,
    pub side: TradeSide,
    #[serde(default)]
    pub mark_price: Option<String>,
    #[serde(default)]
    pub closed_pnl: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub trade_id: Option<i64>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}
