//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector`: opens one upstream connection for one symbol and
//!   decodes its payloads into ticks
//!
//! ## Driver Ports (Inbound)
//!
//! - `TickSource`: what the gateway needs from a provider's multiplexer

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;

use crate::domain::streaming::{Provider, Symbol, Tick};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while opening or reading an upstream feed.
///
/// Only `MissingCredential` ever reaches a client; every other variant is
/// absorbed by the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Provider requires a credential that is not configured.
    #[error("{0} feed requires a session credential")]
    MissingCredential(Provider),

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Transport error on an established connection.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Upstream closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// No frame arrived within the idle window.
    #[error("no upstream frame for {0:?}")]
    IdleTimeout(Duration),
}

impl FeedError {
    /// Check whether the reconnect loop may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingCredential(_))
    }
}

/// Errors decoding a single upstream record.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Decimal field could not be parsed.
    #[error("invalid decimal in field {field}: {value}")]
    InvalidDecimal {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// Timestamp was out of range.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Invalid record format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

// =============================================================================
// Upstream Frames
// =============================================================================

/// One unit read from an upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// A text payload, possibly holding several newline-delimited records.
    Text(String),
    /// Transport-level liveness signal (ping/pong). Resets the idle watchdog.
    Heartbeat,
    /// Upstream deliberately ended the stream. No reconnect follows.
    End,
}

/// The frame sequence of one open upstream connection.
///
/// The stream ending without an `End` frame means the connection dropped.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<UpstreamFrame, FeedError>> + Send>>;

/// A decoded upstream record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    /// A price event to multicast.
    Tick(Tick),
    /// The venue rejected something; reported to subscribers as non-fatal.
    Rejected(String),
}

// =============================================================================
// Feed Connector (Driven Port)
// =============================================================================

/// Opens upstream connections for one provider.
///
/// Implementations hold no per-symbol state; the multiplexer owns the
/// lifecycle of every connection it opens.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    /// Provider served by this connector.
    fn provider(&self) -> Provider;

    /// Check preconditions before any state is created for a subscribe.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::MissingCredential` when the provider cannot be
    /// used at all.
    fn preflight(&self) -> Result<(), FeedError> {
        Ok(())
    }

    /// Open one upstream connection for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or its handshake fails.
    async fn open(&self, symbol: &Symbol) -> Result<FrameStream, FeedError>;

    /// Decode a text payload into records, one result per record.
    fn decode(&self, symbol: &Symbol, payload: &str) -> Vec<Result<DecodedRecord, CodecError>>;
}

// =============================================================================
// Tick Source (Driver Port)
// =============================================================================

/// Event delivered to the subscribers of one shared stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A price event.
    Tick(Tick),
    /// Non-fatal upstream rejection.
    Error(String),
    /// The stream ended and will not reconnect.
    Completed,
}

/// Receiving side of a subscription.
///
/// Yields the cached last tick first (when one existed at subscribe time),
/// then live events in upstream order.
#[derive(Debug)]
pub struct EventReceiver {
    replay: Option<Tick>,
    live: broadcast::Receiver<StreamEvent>,
}

impl EventReceiver {
    /// Create a receiver with an optional replayed tick.
    #[must_use]
    pub const fn new(replay: Option<Tick>, live: broadcast::Receiver<StreamEvent>) -> Self {
        Self { replay, live }
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the stream is gone. Events skipped because this
    /// receiver lagged are counted and logged, not surfaced.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if let Some(tick) = self.replay.take() {
            return Some(StreamEvent::Tick(tick));
        }

        loop {
            match self.live.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Subscriber lagged, ticks dropped");
                    metrics::counter!("ticker_relay_ticks_lagged_total").increment(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Token representing one subscriber's interest in a shared stream.
///
/// Dropping it releases the interest exactly once.
pub trait SubscriptionHandle: Send + Sync + std::fmt::Debug {
    /// Symbol the handle refers to.
    fn symbol(&self) -> &Symbol;

    /// Provider the handle refers to.
    fn provider(&self) -> Provider;
}

/// A live subscription: events plus the handle keeping them flowing.
#[derive(Debug)]
pub struct Subscription {
    /// Event receiver.
    pub events: EventReceiver,
    /// Release token.
    pub handle: Box<dyn SubscriptionHandle>,
}

/// Multiplexed per-symbol tick source for one provider.
pub trait TickSource: Send + Sync {
    /// Provider served by this source.
    fn provider(&self) -> Provider;

    /// Subscribe to a symbol, sharing any existing upstream connection.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::MissingCredential` when the provider's
    /// preconditions are not met; no state is created in that case.
    fn subscribe(&self, symbol: &Symbol) -> Result<Subscription, FeedError>;
}
