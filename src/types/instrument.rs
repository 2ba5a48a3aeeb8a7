//! Instrument metadata types, one shape per venue.

use serde::{Deserialize, Serialize};

/// Hyperliquid perpetual instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Coin symbol
    pub name: String,
    /// Size decimals
    pub sz_decimals: u32,
    pub max_leverage: Option<u32>,
    #[serde(default)]
    pub only_isolated: Option<bool>,
    /// e.g. "perp" or "spot"
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Lighter.xyz instrument with its market configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LighterInstrument {
    pub symbol: String,
    pub market_id: u32,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Taker fee as decimal string
    #[serde(default)]
    pub taker_fee: Option<String>,
    /// Maker fee as decimal string
    #[serde(default)]
    pub maker_fee: Option<String>,
    #[serde(default)]
    pub min_base_amount: Option<String>,
    #[serde(default)]
    pub min_quote_amount: Option<String>,
    #[serde(default)]
    pub size_decimals: Option<u32>,
    #[serde(default)]
    pub price_decimals: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// HIP-3 builder-deployed perpetual, with live market context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hip3Instrument {
    /// Case-sensitive coin name, e.g. "km:US500"
    pub coin: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub mark_price: Option<String>,
    #[serde(default)]
    pub open_interest: Option<String>,
    #[serde(default)]
    pub mid_price: Option<String>,
}

fn default_active() -> bool {
    true
}
