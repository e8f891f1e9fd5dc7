//! Crypto Feed Connector (Binance)
//!
//! One WebSocket per symbol on the raw trade stream:
//!
//! ```text
//! {BINANCE_STREAM_URL}/{lowercase symbol}@trade
//! ```
//!
//! No credential or handshake is needed; the venue starts pushing trades as
//! soon as the socket opens.

use async_trait::async_trait;

use super::codec::BinanceCodec;
use super::frames::{connect, into_frames};
use crate::application::ports::{
    CodecError, DecodedRecord, FeedConnector, FeedError, FrameStream,
};
use crate::domain::streaming::{Provider, Symbol};

/// Default Binance stream base URL.
pub const DEFAULT_BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Connector for Binance trade streams.
#[derive(Debug, Clone)]
pub struct BinanceConnector {
    base_url: String,
    codec: BinanceCodec,
}

impl BinanceConnector {
    /// Create a connector for a stream base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            codec: BinanceCodec::new(),
        }
    }

    /// Build the stream URL for a symbol.
    #[must_use]
    pub fn stream_url(&self, symbol: &Symbol) -> String {
        format!(
            "{}/{}@trade",
            self.base_url.trim_end_matches('/'),
            Provider::Crypto.symbol_key(symbol)
        )
    }
}

impl Default for BinanceConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BINANCE_STREAM_URL)
    }
}

#[async_trait]
impl FeedConnector for BinanceConnector {
    fn provider(&self) -> Provider {
        Provider::Crypto
    }

    async fn open(&self, symbol: &Symbol) -> Result<FrameStream, FeedError> {
        let url = self.stream_url(symbol);
        tracing::info!(url = %url, symbol = %symbol, "Connecting to crypto stream");

        let socket = connect(&url).await?;
        Ok(into_frames(socket))
    }

    fn decode(&self, symbol: &Symbol, payload: &str) -> Vec<Result<DecodedRecord, CodecError>> {
        self.codec.decode(symbol, payload)
    }
}
