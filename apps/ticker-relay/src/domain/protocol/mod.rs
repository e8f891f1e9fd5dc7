//! Downstream Wire Protocol
//!
//! JSON envelope exchanged with downstream clients:
//!
//! ```text
//! {"event": "<name>", "data": <payload>}
//! ```
//!
//! Client commands are decoded and validated at the boundary; anything that
//! does not match a known command becomes a [`ProtocolError`] reported back to
//! the sending client only.

use serde::{Deserialize, Serialize};

use super::streaming::{Provider, Tick};

// =============================================================================
// Errors
// =============================================================================

/// Errors decoding a client frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match any command.
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame type the relay does not accept (binary, etc.).
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(&'static str),
}

// =============================================================================
// Client -> Server
// =============================================================================

/// A command sent by a downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Start receiving ticks for a symbol.
    Subscribe {
        /// Raw symbol, normalized by the gateway.
        symbol: String,
        /// Explicit provider; auto-routed when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<Provider>,
    },
    /// Stop receiving ticks for a symbol.
    Unsubscribe {
        /// Raw symbol, normalized by the gateway.
        symbol: String,
    },
}

impl ClientCommand {
    /// Decode a text frame into a command.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` for unknown events, missing fields or
    /// an unknown `source`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

/// An event pushed to a downstream client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Session accepted.
    Ready {
        /// Session identifier.
        id: String,
    },
    /// Subscribe acknowledged.
    Subscribed {
        /// Normalized symbol.
        symbol: String,
        /// Provider serving the symbol.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Provider>,
        /// True when the session was already subscribed.
        already: bool,
    },
    /// Unsubscribe acknowledged, or the stream completed.
    Unsubscribed {
        /// Normalized symbol.
        symbol: String,
        /// Provider that served the symbol.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Provider>,
        /// True when there was nothing to unsubscribe.
        #[serde(skip_serializing_if = "Option::is_none")]
        already: Option<bool>,
        /// True when the upstream stream ended on its own.
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<bool>,
    },
    /// A relayed price event.
    Tick(Tick),
    /// A client-visible error.
    Error {
        /// Human-readable description.
        message: String,
        /// Symbol the error relates to.
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        /// Provider the error relates to.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Provider>,
    },
    /// Upstream stream for a symbol ended (crypto namespace).
    Complete {
        /// Normalized symbol.
        symbol: String,
    },
}

impl ServerEvent {
    /// Build an error event with no symbol context.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            symbol: None,
            source: None,
        }
    }

    /// Build an error event scoped to a symbol.
    #[must_use]
    pub fn symbol_error(message: impl Into<String>, symbol: &str, source: Provider) -> Self {
        Self::Error {
            message: message.into(),
            symbol: Some(symbol.to_string()),
            source: Some(source),
        }
    }

    /// Get the event name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::Tick(_) => "tick",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// Encode the event as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn decode_subscribe_without_source() {
        let cmd = ClientCommand::decode(r#"{"event":"subscribe","data":{"symbol":"btcusdt"}}"#)
            .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Subscribe {
                symbol: "btcusdt".to_string(),
                source: None
            }
        );
    }

    #[test]
    fn decode_subscribe_with_venue_alias() {
        let cmd = ClientCommand::decode(
            r#"{"event":"subscribe","data":{"symbol":"AAPL","source":"binance"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Subscribe {
                symbol: "AAPL".to_string(),
                source: Some(Provider::Crypto)
            }
        );
    }

    #[test]
    fn decode_unsubscribe() {
        let cmd =
            ClientCommand::decode(r#"{"event":"unsubscribe","data":{"symbol":"AAPL"}}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Unsubscribe {
                symbol: "AAPL".to_string()
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_event() {
        let err = ClientCommand::decode(r#"{"event":"explode","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_unknown_source() {
        let err = ClientCommand::decode(
            r#"{"event":"subscribe","data":{"symbol":"AAPL","source":"nyse"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(ClientCommand::decode("subscribe AAPL").is_err());
    }

    #[test]
    fn subscribed_envelope_shape() {
        let event = ServerEvent::Subscribed {
            symbol: "BTCUSDT".to_string(),
            source: Some(Provider::Crypto),
            already: false,
        };

        let json: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(json["event"], "subscribed");
        assert_eq!(json["data"]["symbol"], "BTCUSDT");
        assert_eq!(json["data"]["source"], "crypto");
        assert_eq!(json["data"]["already"], false);
    }

    #[test]
    fn unsubscribed_omits_unset_flags() {
        let event = ServerEvent::Unsubscribed {
            symbol: "AAPL".to_string(),
            source: None,
            already: Some(true),
            completed: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["already"], true);
        assert!(json["data"].get("completed").is_none());
        assert!(json["data"].get("source").is_none());
    }

    #[test]
    fn tick_envelope_carries_tick_fields() {
        let tick = Tick::quote(
            Provider::Equities,
            "AAPL",
            Some(Decimal::new(18950, 2)),
            Some(Decimal::new(18952, 2)),
            Utc::now(),
        );
        let event = ServerEvent::Tick(tick);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(event.name(), "tick");
        assert_eq!(json["event"], "tick");
        assert_eq!(json["data"]["kind"], "quote");
        assert_eq!(json["data"]["bid"], "189.50");
    }

    #[test]
    fn error_helpers() {
        let plain = serde_json::to_value(ServerEvent::error("symbol is required")).unwrap();
        assert_eq!(plain["data"]["message"], "symbol is required");
        assert!(plain["data"].get("symbol").is_none());

        let scoped = serde_json::to_value(ServerEvent::symbol_error(
            "missing credential",
            "AAPL",
            Provider::Equities,
        ))
        .unwrap();
        assert_eq!(scoped["data"]["symbol"], "AAPL");
        assert_eq!(scoped["data"]["source"], "equities");
    }
}
