//! Upstream Wire Message Types
//!
//! Wire format types for the venue WebSocket feeds. These map directly to the
//! venues' JSON schemas; conversion into [`Tick`](crate::Tick) happens in the
//! codec.
//!
//! # Crypto (Binance trade stream)
//!
//! ```json
//! {"e":"trade","E":1700000000123,"s":"BTCUSDT","t":12345,"p":"64000.10","q":"0.015","T":1700000000120,"m":true}
//! ```
//!
//! Errors arrive as `{"code":2,"msg":"Invalid request"}`.
//!
//! # Equities (Tradier market events)
//!
//! One JSON object per line when `linebreak` is requested:
//!
//! ```json
//! {"type":"quote","symbol":"AAPL","bid":189.5,"bidsz":3,"biddate":"1700000000000","ask":189.52,"asksz":1,"askdate":"1700000000000"}
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Crypto
// =============================================================================

/// Binance trade event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceTrade {
    /// Event type (`trade`).
    #[serde(rename = "e")]
    pub event_type: String,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Price as a decimal string.
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity as a decimal string.
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time (Unix milliseconds).
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// Binance error response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub msg: String,
}

// =============================================================================
// Equities
// =============================================================================

/// Tradier quote event.
///
/// Prices may arrive as numbers or strings, so they are kept as raw values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradierQuote {
    /// Symbol.
    pub symbol: String,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<serde_json::Value>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<serde_json::Value>,
    /// Bid time (Unix milliseconds as a string).
    #[serde(default)]
    pub biddate: Option<String>,
    /// Ask time (Unix milliseconds as a string).
    #[serde(default)]
    pub askdate: Option<String>,
}

/// Tradier streaming subscription payload, sent once after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradierSubscribeRequest {
    /// Symbols to stream.
    pub symbols: Vec<String>,
    /// Streaming session id.
    pub sessionid: String,
    /// Request newline-delimited records.
    pub linebreak: bool,
}

impl TradierSubscribeRequest {
    /// Build a request for a single symbol.
    #[must_use]
    pub fn single(symbol: &str, session_id: &str) -> Self {
        Self {
            symbols: vec![symbol.to_string()],
            sessionid: session_id.to_string(),
            linebreak: true,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
