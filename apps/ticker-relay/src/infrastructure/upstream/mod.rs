//! Upstream Feed Adapters
//!
//! Per-symbol multiplexing of venue WebSocket feeds:
//!
//! - **Crypto**: Binance trade streams
//! - **Equities**: Tradier market event streams (session id required)
//!
//! Each provider gets one [`UpstreamFeedSource`] holding at most one live
//! [`SharedStream`] per symbol.

pub mod binance;
pub mod codec;
pub mod credential;
pub mod feed_source;
pub mod frames;
pub mod messages;
pub mod reconnect;
pub mod shared_stream;
pub mod tradier;

pub use binance::{BinanceConnector, DEFAULT_BINANCE_STREAM_URL};
pub use codec::{BinanceCodec, TradierCodec};
pub use credential::SessionCredential;
pub use feed_source::{StreamHandle, UpstreamFeedSource};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, backoff_delay};
pub use shared_stream::{ConnectionState, SharedStream, StreamSettings, StreamStatus};
pub use tradier::{DEFAULT_TRADIER_STREAM_URL, TradierConnector};
