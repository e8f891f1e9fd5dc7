//! Stream Codec Module
//!
//! Decodes venue payloads into ticks.
//!
//! A payload may carry several newline-delimited records. Each record is
//! decoded on its own so one malformed line never hides its neighbours.
//!
//! - **Crypto**: Binance trade events (`e == "trade"`), error objects become
//!   rejections, anything else is an `other` tick.
//! - **Equities**: Tradier records (`type == "quote"`), records carrying an
//!   `error` field become rejections, anything else is an `other` tick.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{BinanceError, BinanceTrade, TradierQuote};
use crate::application::ports::{CodecError, DecodedRecord};
use crate::domain::streaming::{Provider, Symbol, Tick};

/// Split a payload into non-blank records.
pub fn split_records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, CodecError> {
    Decimal::from_str(raw.trim()).map_err(|_| CodecError::InvalidDecimal {
        field,
        value: raw.to_string(),
    })
}

fn decimal_value(
    field: &'static str,
    value: Option<&serde_json::Value>,
) -> Result<Option<Decimal>, CodecError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => parse_decimal(field, &n.to_string()).map(Some),
        Some(serde_json::Value::String(s)) => parse_decimal(field, s).map(Some),
        Some(other) => Err(CodecError::InvalidDecimal {
            field,
            value: other.to_string(),
        }),
    }
}

fn timestamp_millis(millis: i64) -> Result<DateTime<Utc>, CodecError> {
    DateTime::from_timestamp_millis(millis).ok_or(CodecError::InvalidTimestamp(millis))
}

fn parse_object(record: &str) -> Result<serde_json::Value, CodecError> {
    let value: serde_json::Value = serde_json::from_str(record)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CodecError::InvalidFormat(format!(
            "expected JSON object, got: {}...",
            record.chars().take(50).collect::<String>()
        )))
    }
}

// =============================================================================
// Crypto
// =============================================================================

/// Codec for Binance trade streams.
#[derive(Debug, Default, Clone)]
pub struct BinanceCodec;

impl BinanceCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a payload into records.
    #[must_use]
    pub fn decode(&self, symbol: &Symbol, payload: &str) -> Vec<Result<DecodedRecord, CodecError>> {
        split_records(payload)
            .map(|record| self.decode_record(symbol, record))
            .collect()
    }

    fn decode_record(&self, symbol: &Symbol, record: &str) -> Result<DecodedRecord, CodecError> {
        let value = parse_object(record)?;

        if value.get("code").is_some() && value.get("msg").is_some() {
            let err: BinanceError = serde_json::from_value(value)?;
            return Ok(DecodedRecord::Rejected(format!("{} ({})", err.msg, err.code)));
        }

        if value.get("e").and_then(serde_json::Value::as_str) == Some("trade") {
            let trade: BinanceTrade = serde_json::from_value(value)?;
            return Ok(DecodedRecord::Tick(Tick::trade(
                Provider::Crypto,
                trade.symbol,
                parse_decimal("p", &trade.price)?,
                parse_decimal("q", &trade.quantity)?,
                timestamp_millis(trade.trade_time)?,
            )));
        }

        Ok(DecodedRecord::Tick(Tick::other(
            Provider::Crypto,
            symbol.as_str(),
            value,
            Utc::now(),
        )))
    }
}

// =============================================================================
// Equities
// =============================================================================

/// Codec for Tradier market event streams.
#[derive(Debug, Default, Clone)]
pub struct TradierCodec;

impl TradierCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a payload into records.
    #[must_use]
    pub fn decode(&self, symbol: &Symbol, payload: &str) -> Vec<Result<DecodedRecord, CodecError>> {
        split_records(payload)
            .map(|record| self.decode_record(symbol, record))
            .collect()
    }

    fn decode_record(&self, symbol: &Symbol, record: &str) -> Result<DecodedRecord, CodecError> {
        let value = parse_object(record)?;

        if let Some(error) = value.get("error") {
            let message = error
                .as_str()
                .map_or_else(|| error.to_string(), ToString::to_string);
            return Ok(DecodedRecord::Rejected(message));
        }

        if value.get("type").and_then(serde_json::Value::as_str) == Some("quote") {
            let quote: TradierQuote = serde_json::from_value(value)?;
            let timestamp = [quote.biddate.as_deref(), quote.askdate.as_deref()]
                .into_iter()
                .flatten()
                .filter_map(|raw| raw.parse::<i64>().ok())
                .max()
                .map_or_else(|| Ok(Utc::now()), timestamp_millis)?;

            return Ok(DecodedRecord::Tick(Tick::quote(
                Provider::Equities,
                quote.symbol,
                decimal_value("bid", quote.bid.as_ref())?,
                decimal_value("ask", quote.ask.as_ref())?,
                timestamp,
            )));
        }

        let reported = value
            .get("symbol")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(symbol.as_str())
            .to_string();
        Ok(DecodedRecord::Tick(Tick::other(
            Provider::Equities,
            reported,
            value,
            Utc::now(),
        )))
    }
}
