//! Network URL constants for the 0xarchive SDK.

/// Default REST API base URL for 0xarchive.
pub const DEFAULT_API_URL: &str = "https://api.0xarchive.io";

/// Default WebSocket URL for 0xarchive.
pub const DEFAULT_WS_URL: &str = "wss://api.0xarchive.io/ws";

/// Environment variable holding the API key read by `WsOptions::from_env`.
pub const API_KEY_ENV: &str = "OXARCHIVE_API_KEY";

/// Environment variable overriding the WebSocket endpoint.
pub const WS_URL_ENV: &str = "OXARCHIVE_WS_URL";
