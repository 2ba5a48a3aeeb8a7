//! Shared utilities and types used across the data types and WebSocket modules.

pub mod price;
pub mod timestamp;
pub mod types;

// Re-export commonly used items
pub use price::{midpoint, parse_decimal, spread_bps};
pub use timestamp::Timestamp;
pub use types::*;
