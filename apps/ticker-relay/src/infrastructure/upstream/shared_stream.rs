//! Shared Upstream Stream
//!
//! One `SharedStream` owns the upstream connection for one symbol of one
//! provider and multicasts everything it decodes to all current subscribers.
//!
//! # Lifecycle
//!
//! ```text
//! Closed ──spawn──► Connecting ──open ok──► Open ──error/close/idle──► Backoff
//!                        ▲                                               │
//!                        └──────────────── delay elapsed ────────────────┘
//! ```
//!
//! The run task exits (state `Closed`) when the stream is cancelled because
//! its last subscriber left, or when it completes: the connector signalled a
//! deliberate end, or a finite reconnect budget ran out.
//!
//! # Replay
//!
//! The last tick is updated and the tick is broadcast under the same lock
//! that a joining subscriber takes to read the cached value and attach its
//! receiver. A late joiner therefore sees the cached tick followed by every
//! later tick, with no gap and no duplicate.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::feed_source::SourceShared;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    DecodedRecord, EventReceiver, FeedConnector, FeedError, FrameStream, StreamEvent,
    UpstreamFrame,
};
use crate::domain::streaming::{Provider, Symbol, Tick};
use crate::infrastructure::config::UpstreamSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Settings
// =============================================================================

/// Per-stream tuning shared by every stream of a source.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
    /// Treat the connection as dead after this long without a frame.
    pub idle_timeout: Option<Duration>,
    /// Broadcast buffer per stream; slower subscribers lag and drop ticks.
    pub capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            idle_timeout: Some(Duration::from_secs(600)),
            capacity: 1024,
        }
    }
}

impl StreamSettings {
    /// Create stream settings from `UpstreamSettings`.
    #[must_use]
    pub const fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::from_settings(settings),
            idle_timeout: settings.idle_timeout,
            capacity: settings.stream_capacity,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Connection state of a shared stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none pending.
    Closed,
    /// Opening the upstream connection.
    Connecting,
    /// Connection established; frames are flowing.
    Open,
    /// Waiting before the next connection attempt.
    Backoff,
}

/// Snapshot of a stream for introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful open.
    pub retry_attempt: u32,
    /// Cached last tick.
    pub last_tick: Option<Tick>,
}

#[derive(Debug)]
struct StreamCore {
    state: ConnectionState,
    retry_attempt: u32,
    last_tick: Option<Tick>,
}

/// How one connection ended.
enum ConnectionEnd {
    Cancelled,
    Completed,
    Failed(FeedError),
}

// =============================================================================
// Shared Stream
// =============================================================================

/// Multicast owner of one upstream connection.
#[derive(Debug)]
pub struct SharedStream {
    symbol: Symbol,
    provider: Provider,
    core: Mutex<StreamCore>,
    sender: broadcast::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl SharedStream {
    /// Create a stream in the `Closed` state. Nothing connects until `run`.
    #[must_use]
    pub fn new(provider: Provider, symbol: Symbol, capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            symbol,
            provider,
            core: Mutex::new(StreamCore {
                state: ConnectionState::Closed,
                retry_attempt: 0,
                last_tick: None,
            }),
            sender,
            cancel: CancellationToken::new(),
        })
    }

    /// Symbol served by this stream.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Provider of this stream.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Snapshot of the stream state.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        let core = self.core.lock();
        StreamStatus {
            state: core.state,
            retry_attempt: core.retry_attempt,
            last_tick: core.last_tick.clone(),
        }
    }

    /// Check whether the stream has been torn down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Attach a new subscriber, replaying the cached tick first.
    #[must_use]
    pub fn join(&self) -> EventReceiver {
        let core = self.core.lock();
        let live = self.sender.subscribe();
        EventReceiver::new(core.last_tick.clone(), live)
    }

    /// Tear the stream down: stop the run task and drop the cached tick.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.core.lock().last_tick = None;
    }

    fn set_state(&self, state: ConnectionState) {
        self.core.lock().state = state;
    }

    fn publish_tick(&self, tick: Tick) {
        let mut core = self.core.lock();
        core.last_tick = Some(tick.clone());
        // No receivers is fine: every subscriber may have just left.
        let _ = self.sender.send(StreamEvent::Tick(tick));
    }

    fn publish(&self, event: StreamEvent) {
        let _core = self.core.lock();
        let _ = self.sender.send(event);
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Connect, pump and reconnect until cancelled or completed.
    pub async fn run(
        self: Arc<Self>,
        connector: Arc<dyn FeedConnector>,
        reconnect: ReconnectConfig,
        idle_timeout: Option<Duration>,
        source: Weak<SourceShared>,
    ) {
        let mut policy = ReconnectPolicy::new(reconnect);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                opened = connector.open(&self.symbol) => opened,
            };

            let end = match opened {
                Ok(frames) => {
                    policy.reset();
                    {
                        let mut core = self.core.lock();
                        core.state = ConnectionState::Open;
                        core.retry_attempt = 0;
                    }
                    tracing::info!(symbol = %self.symbol, provider = %self.provider, "Upstream connected");

                    metrics::record_upstream_connected(self.provider);
                    let end = self.pump(connector.as_ref(), frames, idle_timeout).await;
                    metrics::record_upstream_disconnected(self.provider);
                    end
                }
                Err(e) => ConnectionEnd::Failed(e),
            };

            match end {
                ConnectionEnd::Cancelled => break,
                ConnectionEnd::Completed => {
                    tracing::info!(symbol = %self.symbol, provider = %self.provider, "Upstream ended");
                    self.complete(&source);
                    break;
                }
                ConnectionEnd::Failed(e) if !e.is_retryable() => {
                    tracing::warn!(symbol = %self.symbol, error = %e, "Upstream failed permanently");
                    self.publish(StreamEvent::Error(e.to_string()));
                    self.complete(&source);
                    break;
                }
                ConnectionEnd::Failed(e) => {
                    let Some(delay) = policy.next_delay() else {
                        tracing::warn!(
                            symbol = %self.symbol,
                            attempts = policy.attempt_count(),
                            "Reconnect attempts exhausted"
                        );
                        self.complete(&source);
                        break;
                    };

                    let attempt = policy.attempt_count();
                    {
                        let mut core = self.core.lock();
                        core.state = ConnectionState::Backoff;
                        core.retry_attempt = attempt;
                    }
                    tracing::warn!(
                        symbol = %self.symbol,
                        provider = %self.provider,
                        error = %e,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Upstream connection lost, reconnecting"
                    );
                    metrics::record_reconnect(self.provider);

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        tracing::debug!(symbol = %self.symbol, provider = %self.provider, "Stream task exited");
    }

    /// Read frames from one connection until it ends.
    async fn pump(
        &self,
        connector: &dyn FeedConnector,
        mut frames: FrameStream,
        idle_timeout: Option<Duration>,
    ) -> ConnectionEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return ConnectionEnd::Cancelled,
                next = next_frame(&mut frames, idle_timeout) => next,
            };

            match next {
                Ok(Some(Ok(UpstreamFrame::Text(payload)))) => self.dispatch(connector, &payload),
                Ok(Some(Ok(UpstreamFrame::Heartbeat))) => {}
                Ok(Some(Ok(UpstreamFrame::End))) => return ConnectionEnd::Completed,
                Ok(Some(Err(e))) | Err(e) => return ConnectionEnd::Failed(e),
                Ok(None) => return ConnectionEnd::Failed(FeedError::ConnectionClosed),
            }
        }
    }

    /// Decode one payload and multicast each record in order.
    fn dispatch(&self, connector: &dyn FeedConnector, payload: &str) {
        for record in connector.decode(&self.symbol, payload) {
            match record {
                Ok(DecodedRecord::Tick(tick)) => {
                    metrics::record_tick_received(self.provider);
                    self.publish_tick(tick);
                }
                Ok(DecodedRecord::Rejected(message)) => {
                    tracing::warn!(symbol = %self.symbol, message = %message, "Upstream rejected request");
                    self.publish(StreamEvent::Error(message));
                }
                Err(e) => {
                    tracing::warn!(symbol = %self.symbol, provider = %self.provider, error = %e, "Malformed upstream record");
                    metrics::record_malformed(self.provider);
                }
            }
        }
    }

    /// Retire from the source, then tell every subscriber the stream ended.
    fn complete(&self, source: &Weak<SourceShared>) {
        if let Some(source) = source.upgrade() {
            source.retire(self);
        }
        self.shutdown();
        self.publish(StreamEvent::Completed);
    }
}

async fn next_frame(
    frames: &mut FrameStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<UpstreamFrame, FeedError>>, FeedError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, frames.next())
            .await
            .map_err(|_| FeedError::IdleTimeout(limit)),
        None => Ok(frames.next().await),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn stream() -> Arc<SharedStream> {
        SharedStream::new(Provider::Crypto, Symbol::parse("BTCUSDT").unwrap(), 16)
    }

    fn tick(price: i64) -> Tick {
        Tick::trade(Provider::Crypto, "BTCUSDT", Decimal::new(price, 0), Decimal::ONE, Utc::now())
    }

    #[tokio::test]
    async fn join_replays_last_tick_then_live() {
        let stream = stream();
        let first = tick(1);
        let second = tick(2);

        stream.publish_tick(first.clone());
        let mut rx = stream.join();
        stream.publish_tick(second.clone());

        assert_eq!(rx.recv().await, Some(StreamEvent::Tick(first)));
        assert_eq!(rx.recv().await, Some(StreamEvent::Tick(second)));
    }

    #[tokio::test]
    async fn join_without_cached_tick_waits_for_live() {
        let stream = stream();
        let mut rx = stream.join();
        let live = tick(7);

        stream.publish_tick(live.clone());

        assert_eq!(rx.recv().await, Some(StreamEvent::Tick(live)));
    }

    #[test]
    fn shutdown_clears_cache_and_cancels() {
        let stream = stream();
        stream.publish_tick(tick(1));

        stream.shutdown();
        stream.shutdown();

        assert!(stream.is_cancelled());
        assert_eq!(stream.status().last_tick, None);
    }

    #[test]
    fn new_stream_is_closed() {
        let status = stream().status();
        assert_eq!(status.state, ConnectionState::Closed);
        assert_eq!(status.retry_attempt, 0);
    }
}
