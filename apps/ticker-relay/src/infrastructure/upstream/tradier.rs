//! Equities Feed Connector (Tradier)
//!
//! One WebSocket per symbol on the market events endpoint. After the socket
//! opens the connector sends
//!
//! ```json
//! {"symbols":["AAPL"],"sessionid":"...","linebreak":true}
//! ```
//!
//! and the venue answers with newline-delimited JSON records.
//!
//! The session id is required; without it `preflight` fails and no
//! connection is attempted.

use std::sync::Arc;

use async_trait::async_trait;
use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use super::codec::TradierCodec;
use super::credential::SessionCredential;
use super::frames::{connect, into_frames};
use super::messages::TradierSubscribeRequest;
use crate::application::ports::{
    CodecError, DecodedRecord, FeedConnector, FeedError, FrameStream,
};
use crate::domain::streaming::{Provider, Symbol};

/// Default Tradier stream host and path.
pub const DEFAULT_TRADIER_STREAM_URL: &str = "ws.tradier.com/v1/markets/events";

/// Connector for Tradier market event streams.
#[derive(Debug, Clone)]
pub struct TradierConnector {
    url: String,
    credential: Arc<SessionCredential>,
    codec: TradierCodec,
}

impl TradierConnector {
    /// Create a connector for a full `wss://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>, credential: Arc<SessionCredential>) -> Self {
        Self {
            url: url.into(),
            credential,
            codec: TradierCodec::new(),
        }
    }

    /// Stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Credential shared with the rest of the process.
    #[must_use]
    pub fn credential(&self) -> &Arc<SessionCredential> {
        &self.credential
    }
}

#[async_trait]
impl FeedConnector for TradierConnector {
    fn provider(&self) -> Provider {
        Provider::Equities
    }

    fn preflight(&self) -> Result<(), FeedError> {
        if self.credential.is_set() {
            Ok(())
        } else {
            Err(FeedError::MissingCredential(Provider::Equities))
        }
    }

    async fn open(&self, symbol: &Symbol) -> Result<FrameStream, FeedError> {
        let session_id = self
            .credential
            .get()
            .ok_or(FeedError::MissingCredential(Provider::Equities))?;
        let key = Provider::Equities.symbol_key(symbol);

        tracing::info!(url = %self.url, symbol = %key, "Connecting to equities stream");

        let mut socket = connect(&self.url).await?;

        let request = TradierSubscribeRequest::single(&key, &session_id)
            .to_json()
            .map_err(|e| FeedError::Connect(format!("failed to serialize subscribe: {e}")))?;
        socket
            .send(Message::Text(request.into()))
            .await
            .map_err(|e| FeedError::WebSocket(e.to_string()))?;

        Ok(into_frames(socket))
    }

    fn decode(&self, symbol: &Symbol, payload: &str) -> Vec<Result<DecodedRecord, CodecError>> {
        self.codec.decode(symbol, payload)
    }
}
