//! Subscription Gateway
//!
//! Tracks, per downstream session, which symbols are subscribed and the
//! handle keeping each one alive. Commands are dispatched here after the
//! transport has decoded them.
//!
//! # State Machine
//!
//! Per (session, symbol):
//!
//! ```text
//! Unsubscribed ──subscribe──► Subscribed ──unsubscribe / complete──► Unsubscribed
//!       │
//!       └──subscribe fails──► error sent, stays Unsubscribed
//! ```
//!
//! Subscribing runs entirely under the session table lock, so no other
//! command for the same session observes a half-subscribed symbol.
//!
//! # Delivery
//!
//! Every session has one ordered lane drained by a pump task into the
//! transport queue. Control events (`ready`, `subscribed`, `unsubscribed`,
//! completion) enter the lane immediately and are never dropped. Ticks and
//! stream errors first take a permit from the session's tick budget, so a
//! slow reader backpressures its forwarders instead of losing control events.
//!
//! # Locking
//!
//! The session table is always locked before any tick source map
//! (gateway → source). Tick sources never call back into the gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EventReceiver, StreamEvent, SubscriptionHandle, TickSource};
use crate::domain::protocol::{ClientCommand, ServerEvent};
use crate::domain::routing::resolve_source;
use crate::domain::streaming::{Provider, Symbol, ValidationError};
use crate::domain::subscription::{GroupRegistry, SessionId};

// =============================================================================
// Namespace
// =============================================================================

/// Downstream endpoint a gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayNamespace {
    /// Auto-routed tickers across all providers.
    Tickers,
    /// Crypto only; completion is reported with `complete`.
    Crypto,
}

impl GatewayNamespace {
    /// URL path of the namespace.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Tickers => "/tickers",
            Self::Crypto => "/crypto",
        }
    }

    /// Resolve the provider for a symbol on this namespace.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnsupportedSource` when the crypto namespace
    /// is asked for another provider.
    pub fn resolve(
        &self,
        symbol: &Symbol,
        explicit: Option<Provider>,
    ) -> Result<Provider, ValidationError> {
        match self {
            Self::Tickers => Ok(resolve_source(symbol.as_str(), explicit)),
            Self::Crypto => match explicit {
                None | Some(Provider::Crypto) => Ok(Provider::Crypto),
                Some(other) => Err(ValidationError::UnsupportedSource(other)),
            },
        }
    }

    /// Event sent when a symbol's stream ends on its own.
    #[must_use]
    pub fn completion_event(&self, symbol: &Symbol, provider: Provider) -> ServerEvent {
        match self {
            Self::Tickers => ServerEvent::Unsubscribed {
                symbol: symbol.to_string(),
                source: Some(provider),
                already: None,
                completed: Some(true),
            },
            Self::Crypto => ServerEvent::Complete {
                symbol: symbol.to_string(),
            },
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// One symbol held by a session.
///
/// Dropping it stops the forwarder and releases the upstream reference.
#[derive(Debug)]
struct SessionSubscription {
    id: u64,
    provider: Provider,
    cancel: CancellationToken,
    _handle: Box<dyn SubscriptionHandle>,
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        gauge!("ticker_relay_subscriptions").decrement(1.0);
    }
}

/// Event waiting in a session lane, with the tick permit it holds (if any).
#[derive(Debug)]
struct Outgoing {
    event: ServerEvent,
    permit: Option<OwnedSemaphorePermit>,
}

/// Ordered writer side of one session.
#[derive(Debug, Clone)]
struct Outbox {
    lane: mpsc::UnboundedSender<Outgoing>,
    tick_budget: Arc<Semaphore>,
}

impl Outbox {
    /// Start the pump feeding `outbound`.
    ///
    /// The pump stops once every lane sender is gone or `outbound` closes.
    fn open(session_id: &SessionId, outbound: mpsc::Sender<ServerEvent>) -> Self {
        let (lane, rx) = mpsc::unbounded_channel();
        let tick_budget = Arc::new(Semaphore::new(outbound.max_capacity()));
        tokio::spawn(pump(session_id.clone(), rx, outbound));
        Self { lane, tick_budget }
    }

    /// Queue a control event. Never dropped while the session is connected.
    fn push(&self, session_id: &str, event: ServerEvent) {
        if self.lane.send(Outgoing { event, permit: None }).is_err() {
            tracing::debug!(session_id, "Outbound queue closed");
        }
    }

    /// Wait for room for one stream event, or `None` once cancelled or closed.
    async fn reserve(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = Arc::clone(&self.tick_budget).acquire_owned() => permit.ok(),
        }
    }

    /// Queue a stream event under a permit from [`Outbox::reserve`].
    fn push_reserved(&self, event: ServerEvent, permit: OwnedSemaphorePermit) -> bool {
        self.lane
            .send(Outgoing {
                event,
                permit: Some(permit),
            })
            .is_ok()
    }
}

async fn pump(
    session_id: SessionId,
    mut lane: mpsc::UnboundedReceiver<Outgoing>,
    outbound: mpsc::Sender<ServerEvent>,
) {
    while let Some(Outgoing { event, permit }) = lane.recv().await {
        if outbound.send(event).await.is_err() {
            tracing::debug!(session_id = %session_id, "Outbound queue closed");
            return;
        }
        drop(permit);
    }
}

#[derive(Debug)]
struct ClientSession {
    outbox: Outbox,
    subscriptions: HashMap<Symbol, SessionSubscription>,
}

impl ClientSession {
    fn push(&self, session_id: &str, event: ServerEvent) {
        self.outbox.push(session_id, event);
    }
}

/// Identity of one forwarder task.
#[derive(Debug, Clone)]
struct ForwardRoute {
    session_id: SessionId,
    symbol: Symbol,
    provider: Provider,
    subscription_id: u64,
    outbox: Outbox,
}

// =============================================================================
// Gateway
// =============================================================================

/// Subscription registry and command handler for one namespace.
pub struct Gateway {
    namespace: GatewayNamespace,
    sources: HashMap<Provider, Arc<dyn TickSource>>,
    sessions: Mutex<HashMap<SessionId, ClientSession>>,
    groups: Arc<GroupRegistry>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("namespace", &self.namespace)
            .field("providers", &self.sources.keys().collect::<Vec<_>>())
            .field("sessions", &self.sessions.lock().len())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway over the given tick sources.
    #[must_use]
    pub fn new(
        namespace: GatewayNamespace,
        sources: impl IntoIterator<Item = Arc<dyn TickSource>>,
    ) -> Arc<Self> {
        let sources = sources
            .into_iter()
            .map(|source| (source.provider(), source))
            .collect();

        Arc::new(Self {
            namespace,
            sources,
            sessions: Mutex::new(HashMap::new()),
            groups: Arc::new(GroupRegistry::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Namespace this gateway serves.
    #[must_use]
    pub const fn namespace(&self) -> GatewayNamespace {
        self.namespace
    }

    /// Symbol group membership across all sessions.
    #[must_use]
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Symbols a session is subscribed to.
    #[must_use]
    pub fn session_symbols(&self, session_id: &str) -> Vec<Symbol> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|session| session.subscriptions.keys().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register a new session and greet it with `ready`.
    ///
    /// A reused id replaces the previous session and releases everything it held.
    pub fn on_connect(&self, session_id: impl Into<SessionId>, outbound: mpsc::Sender<ServerEvent>) {
        let session_id = session_id.into();
        let session = ClientSession {
            outbox: Outbox::open(&session_id, outbound),
            subscriptions: HashMap::new(),
        };
        session.push(
            &session_id,
            ServerEvent::Ready {
                id: session_id.clone(),
            },
        );

        let replaced = {
            let mut sessions = self.sessions.lock();
            let replaced = sessions.insert(session_id.clone(), session);
            if replaced.is_some() {
                self.groups.leave_all(&session_id);
            }
            replaced
        };

        if let Some(previous) = replaced {
            let released = previous.subscriptions.len();
            drop(previous);
            tracing::warn!(
                session_id = %session_id,
                released,
                "Session id reused, previous session dropped"
            );
        } else {
            gauge!("ticker_relay_sessions", "namespace" => self.namespace.path()).increment(1.0);
        }
        tracing::info!(
            session_id = %session_id,
            namespace = self.namespace.path(),
            "Session connected"
        );
    }

    /// Release every subscription of a session and forget it.
    ///
    /// Nothing is sent to the session.
    pub fn on_disconnect(&self, session_id: &str) {
        let Some(session) = self.sessions.lock().remove(session_id) else {
            return;
        };

        self.groups.leave_all(session_id);
        let released = session.subscriptions.len();
        drop(session);

        gauge!("ticker_relay_sessions", "namespace" => self.namespace.path()).decrement(1.0);
        tracing::info!(session_id, released, "Session disconnected");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Route a decoded client command to its handler.
    pub fn dispatch(self: &Arc<Self>, session_id: &str, command: ClientCommand) {
        match command {
            ClientCommand::Subscribe { symbol, source } => {
                self.on_subscribe(session_id, &symbol, source);
            }
            ClientCommand::Unsubscribe { symbol } => {
                self.on_unsubscribe(session_id, &symbol);
            }
        }
    }

    /// Report an undecodable frame to its sender.
    pub fn reject(&self, session_id: &str, message: impl Into<String>) {
        if let Some(session) = self.sessions.lock().get(session_id) {
            session.push(session_id, ServerEvent::error(message));
        }
    }

    /// Subscribe a session to a symbol.
    pub fn on_subscribe(self: &Arc<Self>, session_id: &str, raw_symbol: &str, source: Option<Provider>) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            tracing::warn!(session_id, "Subscribe from unknown session");
            return;
        };

        let symbol = match Symbol::parse(raw_symbol) {
            Ok(symbol) => symbol,
            Err(e) => {
                session.push(session_id, ServerEvent::error(e.to_string()));
                return;
            }
        };

        if let Some(existing) = session.subscriptions.get(&symbol) {
            session.push(
                session_id,
                ServerEvent::Subscribed {
                    symbol: symbol.to_string(),
                    source: Some(existing.provider),
                    already: true,
                },
            );
            return;
        }

        let provider = match self.namespace.resolve(&symbol, source) {
            Ok(provider) => provider,
            Err(e) => {
                session.push(session_id, ServerEvent::error(e.to_string()));
                return;
            }
        };

        let Some(tick_source) = self.sources.get(&provider) else {
            let message = ValidationError::UnsupportedSource(provider).to_string();
            session.push(session_id, ServerEvent::symbol_error(message, symbol.as_str(), provider));
            return;
        };

        let subscription = match tick_source.subscribe(&symbol) {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(
                    session_id,
                    symbol = %symbol,
                    provider = %provider,
                    error = %e,
                    "Subscribe rejected"
                );
                session.push(session_id, ServerEvent::symbol_error(e.to_string(), symbol.as_str(), provider));
                return;
            }
        };

        self.groups.join(session_id, &symbol);

        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        session.subscriptions.insert(
            symbol.clone(),
            SessionSubscription {
                id: subscription_id,
                provider,
                cancel: cancel.clone(),
                _handle: subscription.handle,
            },
        );
        gauge!("ticker_relay_subscriptions").increment(1.0);

        session.push(
            session_id,
            ServerEvent::Subscribed {
                symbol: symbol.to_string(),
                source: Some(provider),
                already: false,
            },
        );

        tracing::info!(session_id, symbol = %symbol, provider = %provider, "Subscribed");

        let route = ForwardRoute {
            session_id: session_id.to_string(),
            symbol,
            provider,
            subscription_id,
            outbox: session.outbox.clone(),
        };
        tokio::spawn(forward(
            Arc::downgrade(self),
            Arc::clone(&self.groups),
            route,
            subscription.events,
            cancel,
        ));
    }

    /// Unsubscribe a session from a symbol.
    pub fn on_unsubscribe(&self, session_id: &str, raw_symbol: &str) {
        let released = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(session_id) else {
                tracing::warn!(session_id, "Unsubscribe from unknown session");
                return;
            };

            let symbol = match Symbol::parse(raw_symbol) {
                Ok(symbol) => symbol,
                Err(e) => {
                    session.push(session_id, ServerEvent::error(e.to_string()));
                    return;
                }
            };

            let Some(released) = session.subscriptions.remove(&symbol) else {
                session.push(
                    session_id,
                    ServerEvent::Unsubscribed {
                        symbol: symbol.to_string(),
                        source: None,
                        already: Some(true),
                        completed: None,
                    },
                );
                return;
            };

            self.groups.leave(session_id, &symbol);
            session.push(
                session_id,
                ServerEvent::Unsubscribed {
                    symbol: symbol.to_string(),
                    source: Some(released.provider),
                    already: Some(false),
                    completed: None,
                },
            );
            tracing::info!(session_id, symbol = %symbol, "Unsubscribed");
            released
        };

        drop(released);
    }

    /// Auto-unsubscribe after a stream completed.
    ///
    /// Ignored if the subscription was already replaced or released.
    fn on_stream_complete(&self, route: &ForwardRoute) {
        let released = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(&route.session_id) else {
                return;
            };

            let current = session
                .subscriptions
                .get(&route.symbol)
                .is_some_and(|s| s.id == route.subscription_id);
            if !current {
                return;
            }

            let released = session.subscriptions.remove(&route.symbol);
            self.groups.leave(&route.session_id, &route.symbol);
            session.push(
                &route.session_id,
                self.namespace.completion_event(&route.symbol, route.provider),
            );
            released
        };

        tracing::info!(
            session_id = %route.session_id,
            symbol = %route.symbol,
            "Stream completed, subscription released"
        );
        drop(released);
    }
}

// =============================================================================
// Forwarder
// =============================================================================

/// Move events from one subscription to its session until released.
async fn forward(
    gateway: Weak<Gateway>,
    groups: Arc<GroupRegistry>,
    route: ForwardRoute,
    mut events: EventReceiver,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Some(StreamEvent::Tick(tick)) => {
                let Some(permit) = route.outbox.reserve(&cancel).await else {
                    return;
                };
                if !groups.is_member(&route.session_id, &route.symbol) {
                    continue;
                }
                if !route.outbox.push_reserved(ServerEvent::Tick(tick), permit) {
                    return;
                }
                counter!("ticker_relay_ticks_delivered_total", "provider" => route.provider.as_str())
                    .increment(1);
            }
            Some(StreamEvent::Error(message)) => {
                let Some(permit) = route.outbox.reserve(&cancel).await else {
                    return;
                };
                let event = ServerEvent::symbol_error(message, route.symbol.as_str(), route.provider);
                if !route.outbox.push_reserved(event, permit) {
                    return;
                }
            }
            Some(StreamEvent::Completed) | None => {
                if cancel.is_cancelled() {
                    return;
                }
                if let Some(gateway) = gateway.upgrade() {
                    gateway.on_stream_complete(&route);
                }
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
