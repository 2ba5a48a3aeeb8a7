//! Shared type definitions for the 0xarchive SDK.
//!
//! This module contains types that are used by both the REST collaborator types and
//! the WebSocket module.

use serde::{Deserialize, Serialize};

// ============================================================================
// Exchange (venue selection, replaces per-venue client classes)
// ============================================================================

/// Exchange venue served by the 0xarchive API.
///
/// Each venue has its own REST base path and its own family of WebSocket
/// channel names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    /// Hyperliquid perpetuals (the default venue)
    #[default]
    Hyperliquid,
    /// Lighter.xyz
    Lighter,
    /// HIP-3 builder-deployed perpetuals on Hyperliquid
    Hip3,
}

impl Exchange {
    /// REST base path for this venue.
    pub fn base_path(&self) -> &'static str {
        match self {
            Self::Hyperliquid => "/v1/hyperliquid",
            Self::Lighter => "/v1/lighter",
            Self::Hip3 => "/v1/hyperliquid/hip3",
        }
    }

    /// Normalize a coin symbol for this venue.
    ///
    /// Hyperliquid and Lighter symbols are upper-cased; HIP-3 names such as
    /// `km:US500` are case-sensitive and only trimmed.
    pub fn normalize_symbol(&self, symbol: &str) -> String {
        match self {
            Self::Hyperliquid | Self::Lighter => symbol.trim().to_uppercase(),
            Self::Hip3 => symbol.trim().to_string(),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hyperliquid => "hyperliquid",
            Self::Lighter => "lighter",
            Self::Hip3 => "hip3",
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Interval Enum (shared between candle types and WebSocket params)
// ============================================================================

/// Candle aggregation interval.
///
/// Used as the extra subscription parameter for candle channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 1 minute candles
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    /// 5 minute candles
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minute candles
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 30 minute candles
    #[serde(rename = "30m")]
    ThirtyMinutes,
    /// 1 hour candles
    #[serde(rename = "1h")]
    OneHour,
    /// 4 hour candles
    #[serde(rename = "4h")]
    FourHours,
    /// 1 day candles
    #[serde(rename = "1d")]
    OneDay,
    /// 1 week candles
    #[serde(rename = "1w")]
    OneWeek,
}

impl Interval {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
