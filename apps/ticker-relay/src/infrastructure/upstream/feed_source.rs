//! Upstream Feed Source
//!
//! One `UpstreamFeedSource` per provider. It maps symbols to their
//! [`SharedStream`], creating a stream on the first subscribe and tearing it
//! down when the last handle is released.
//!
//! Every refcount change happens under the source's map lock, so a subscribe
//! racing the final unsubscribe either joins the old stream before teardown
//! or creates a fresh one after it, never a dying one.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::shared_stream::{SharedStream, StreamSettings, StreamStatus};
use crate::application::ports::{
    FeedConnector, FeedError, Subscription, SubscriptionHandle, TickSource,
};
use crate::domain::streaming::{Provider, Symbol};
use crate::infrastructure::metrics;

// =============================================================================
// Source State
// =============================================================================

#[derive(Debug)]
struct Slot {
    stream: Arc<SharedStream>,
    subscribers: usize,
}

/// State shared between a source, its handles and its streams.
pub struct SourceShared {
    provider: Provider,
    connector: Arc<dyn FeedConnector>,
    settings: StreamSettings,
    streams: Mutex<HashMap<String, Slot>>,
}

impl SourceShared {
    /// Drop one reference; tear the stream down when none remain.
    fn release(&self, stream: &Arc<SharedStream>) {
        let key = self.provider.symbol_key(stream.symbol());
        let mut streams = self.streams.lock();

        let Entry::Occupied(mut entry) = streams.entry(key) else {
            return;
        };
        // The stream may already have been retired and replaced.
        if !Arc::ptr_eq(&entry.get().stream, stream) {
            return;
        }

        let slot = entry.get_mut();
        slot.subscribers = slot.subscribers.saturating_sub(1);
        if slot.subscribers > 0 {
            return;
        }

        let slot = entry.remove();
        slot.stream.shutdown();
        metrics::set_active_streams(self.provider, streams.len());
        tracing::info!(symbol = %stream.symbol(), provider = %self.provider, "Last subscriber left, stream closed");
    }

    /// Remove a completed stream so the next subscribe starts fresh.
    pub(super) fn retire(&self, stream: &SharedStream) {
        let key = self.provider.symbol_key(stream.symbol());
        let mut streams = self.streams.lock();

        let is_current = streams
            .get(&key)
            .is_some_and(|slot| std::ptr::eq(Arc::as_ptr(&slot.stream), stream));
        if is_current {
            streams.remove(&key);
            metrics::set_active_streams(self.provider, streams.len());
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// RAII reference to a shared stream. Dropping it releases the reference.
#[derive(Debug)]
pub struct StreamHandle {
    stream: Arc<SharedStream>,
    source: Weak<SourceShared>,
}

impl SubscriptionHandle for StreamHandle {
    fn symbol(&self) -> &Symbol {
        self.stream.symbol()
    }

    fn provider(&self) -> Provider {
        self.stream.provider()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.release(&self.stream);
        }
    }
}

impl std::fmt::Debug for SourceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceShared")
            .field("provider", &self.provider)
            .field("streams", &self.streams.lock().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Feed Source
// =============================================================================

/// Per-provider multiplexer of upstream streams.
#[derive(Debug, Clone)]
pub struct UpstreamFeedSource {
    shared: Arc<SourceShared>,
}

impl UpstreamFeedSource {
    /// Create a source over a connector.
    #[must_use]
    pub fn new(connector: Arc<dyn FeedConnector>, settings: StreamSettings) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                provider: connector.provider(),
                connector,
                settings,
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a symbol.
    ///
    /// # Errors
    ///
    /// Returns the connector's preflight error (e.g. a missing credential);
    /// nothing is created in that case.
    pub fn subscribe(&self, symbol: &Symbol) -> Result<Subscription, FeedError> {
        self.shared.connector.preflight()?;

        let key = self.shared.provider.symbol_key(symbol);
        let mut streams = self.shared.streams.lock();

        let stream = match streams.entry(key) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.subscribers += 1;
                tracing::debug!(symbol = %symbol, subscribers = slot.subscribers, "Joined existing stream");
                Arc::clone(&slot.stream)
            }
            Entry::Vacant(entry) => {
                let stream = SharedStream::new(
                    self.shared.provider,
                    symbol.clone(),
                    self.shared.settings.capacity,
                );
                tokio::spawn(Arc::clone(&stream).run(
                    Arc::clone(&self.shared.connector),
                    self.shared.settings.reconnect.clone(),
                    self.shared.settings.idle_timeout,
                    Arc::downgrade(&self.shared),
                ));
                entry.insert(Slot {
                    stream: Arc::clone(&stream),
                    subscribers: 1,
                });
                tracing::info!(symbol = %symbol, provider = %self.shared.provider, "Stream created");
                stream
            }
        };

        let events = stream.join();
        metrics::set_active_streams(self.shared.provider, streams.len());
        drop(streams);

        Ok(Subscription {
            events,
            handle: Box::new(StreamHandle {
                stream,
                source: Arc::downgrade(&self.shared),
            }),
        })
    }

    /// Release a subscription. Equivalent to dropping its handle.
    pub fn unsubscribe(&self, handle: Box<dyn SubscriptionHandle>) {
        drop(handle);
    }

    /// Provider served by this source.
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.shared.provider
    }

    /// Number of live streams.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.shared.streams.lock().len()
    }

    /// Number of subscribers of a symbol's stream (0 when none exists).
    #[must_use]
    pub fn subscriber_count(&self, symbol: &Symbol) -> usize {
        let key = self.shared.provider.symbol_key(symbol);
        self.shared
            .streams
            .lock()
            .get(&key)
            .map_or(0, |slot| slot.subscribers)
    }

    /// Snapshot of a symbol's stream, if one exists.
    #[must_use]
    pub fn stream_status(&self, symbol: &Symbol) -> Option<StreamStatus> {
        let key = self.shared.provider.symbol_key(symbol);
        let stream = self
            .shared
            .streams
            .lock()
            .get(&key)
            .map(|slot| Arc::clone(&slot.stream))?;
        Some(stream.status())
    }

    /// Tear down every stream. Outstanding handles become no-ops.
    pub fn shutdown(&self) {
        let drained: Vec<Slot> = self
            .shared
            .streams
            .lock()
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        for slot in &drained {
            slot.stream.shutdown();
        }
        metrics::set_active_streams(self.shared.provider, 0);
        tracing::info!(provider = %self.shared.provider, closed = drained.len(), "Feed source shut down");
    }
}

impl TickSource for UpstreamFeedSource {
    fn provider(&self) -> Provider {
        self.shared.provider
    }

    fn subscribe(&self, symbol: &Symbol) -> Result<Subscription, FeedError> {
        Self::subscribe(self, symbol)
    }
}
