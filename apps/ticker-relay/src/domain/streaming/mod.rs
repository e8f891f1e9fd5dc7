//! Market Data Streaming Types
//!
//! Core domain types for relayed market data: providers, symbols and ticks.
//! These types are codec-agnostic and represent the canonical internal
//! representation of an upstream price event, whichever venue produced it.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Provider
// =============================================================================

/// Upstream market data provider.
///
/// Serialized as `"crypto"` / `"equities"`; the venue names `"binance"` and
/// `"tradier"` are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Crypto venue (Binance trade streams).
    #[serde(alias = "binance")]
    Crypto,
    /// Equities venue (Tradier quote streams).
    #[serde(alias = "tradier")]
    Equities,
}

impl Provider {
    /// Get all providers.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Crypto, Self::Equities]
    }

    /// Get the wire name of the provider.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Equities => "equities",
        }
    }

    /// Derive the provider-specific key for a symbol.
    ///
    /// Crypto streams are addressed by the lowercased symbol, equities by the
    /// uppercased one.
    #[must_use]
    pub fn symbol_key(&self, symbol: &Symbol) -> String {
        match self {
            Self::Crypto => symbol.as_str().to_lowercase(),
            Self::Equities => symbol.as_str().to_uppercase(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Rejection of a client-supplied value before it reaches any state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Symbol was empty or whitespace only.
    #[error("symbol is required")]
    EmptySymbol,
    /// Provider is not served on this endpoint.
    #[error("source {0} is not available here")]
    UnsupportedSource(Provider),
}

/// A normalized instrument identifier (trimmed, uppercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw client symbol.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptySymbol` if nothing remains after trimming.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// Discriminates the kind of upstream event a tick carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickKind {
    /// Executed trade with price and quantity.
    Trade,
    /// Top-of-book quote with bid/ask.
    Quote,
    /// Heartbeat or any record the relay does not interpret.
    Other,
}

/// One normalized price event from an upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    /// Provider that produced the tick.
    pub provider: Provider,
    /// Event kind.
    pub kind: TickKind,
    /// Instrument symbol as reported upstream.
    pub symbol: String,
    /// Trade price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Best bid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,
    /// Trade quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Raw upstream record for `other` ticks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Tick {
    /// Create a trade tick.
    #[must_use]
    pub fn trade(
        provider: Provider,
        symbol: impl Into<String>,
        price: Decimal,
        quantity: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            kind: TickKind::Trade,
            symbol: symbol.into(),
            price: Some(price),
            bid: None,
            ask: None,
            quantity: Some(quantity),
            timestamp,
            raw: None,
        }
    }

    /// Create a quote tick. Either side may be missing upstream.
    #[must_use]
    pub fn quote(
        provider: Provider,
        symbol: impl Into<String>,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            kind: TickKind::Quote,
            symbol: symbol.into(),
            price: None,
            bid,
            ask,
            quantity: None,
            timestamp,
            raw: None,
        }
    }

    /// Create a tick wrapping an uninterpreted upstream record.
    #[must_use]
    pub fn other(
        provider: Provider,
        symbol: impl Into<String>,
        raw: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            kind: TickKind::Other,
            symbol: symbol.into(),
            price: None,
            bid: None,
            ask: None,
            quantity: None,
            timestamp,
            raw: Some(raw),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
