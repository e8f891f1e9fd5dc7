#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Ticker Relay - Market Data Multiplexer
//!
//! A WebSocket relay that keeps at most one upstream connection per symbol
//! (Binance trade streams for crypto, Tradier market events for equities)
//! and fans each tick out to every downstream client subscribed to it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Providers, symbols and ticks
//!   - `routing`: Symbol-to-provider resolution
//!   - `protocol`: Downstream command and event frames
//!   - `subscription`: Session/group membership
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed connector and tick source contracts
//!   - `gateway`: Per-namespace session and subscription management
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Venue connectors, codecs and the shared-stream multiplexer
//!   - `server`: Downstream WebSocket endpoints
//!   - `config`: Configuration from the environment
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! Binance WS (1 per symbol) ──┐                      ┌──► /tickers client 1
//!                             ├──► SharedStream ─────┤
//! Tradier WS (1 per symbol) ──┘    (broadcast)       ├──► /tickers client N
//!                                                    └──► /crypto client M
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::protocol::{ClientCommand, ProtocolError, ServerEvent};
pub use domain::routing::resolve_source;
pub use domain::streaming::{Provider, Symbol, Tick, TickKind, ValidationError};
pub use domain::subscription::{GroupRegistry, GroupStats, SessionId};

// Application
pub use application::gateway::{Gateway, GatewayNamespace};
pub use application::ports::{
    CodecError, DecodedRecord, EventReceiver, FeedConnector, FeedError, FrameStream, StreamEvent,
    Subscription, SubscriptionHandle, TickSource, UpstreamFrame,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, RelayConfig, ServerSettings, UpstreamSettings, VenueSettings,
};

// Upstream multiplexer
pub use infrastructure::upstream::{
    BinanceConnector, ConnectionState, ReconnectConfig, SessionCredential, StreamSettings,
    StreamStatus, TradierConnector, UpstreamFeedSource,
};

// Downstream server
pub use infrastructure::server::{RelayServer, ServerError, ServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
