//! Shared helpers for the integration tests.
//!
//! `ScriptedConnector` stands in for a venue: every `open` hands out a frame
//! stream the test feeds by hand, and decoding goes through the real codecs.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;

use ticker_relay::infrastructure::upstream::{BinanceCodec, TradierCodec};
use ticker_relay::{
    CodecError, DecodedRecord, EventReceiver, FeedConnector, FeedError, FrameStream, Gateway,
    GatewayNamespace, Provider, ReconnectConfig, ServerEvent, SessionCredential, StreamEvent,
    StreamSettings, Symbol, TickSource, UpstreamFeedSource, UpstreamFrame,
};

type FrameSender = mpsc::UnboundedSender<Result<UpstreamFrame, FeedError>>;

/// Decrements the live counter when the frame stream is dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test double for a venue connector.
pub struct ScriptedConnector {
    provider: Provider,
    credential: Option<Arc<SessionCredential>>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    fail_next: AtomicUsize,
    feeds: Mutex<HashMap<String, FrameSender>>,
    open_times: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    fn build(provider: Provider, credential: Option<Arc<SessionCredential>>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            credential,
            opens: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            fail_next: AtomicUsize::new(0),
            feeds: Mutex::new(HashMap::new()),
            open_times: Mutex::new(Vec::new()),
        })
    }

    pub fn crypto() -> Arc<Self> {
        Self::build(Provider::Crypto, None)
    }

    /// Equities connector gated on a session credential, like the real one.
    pub fn equities(credential: Arc<SessionCredential>) -> Arc<Self> {
        Self::build(Provider::Equities, Some(credential))
    }

    /// Total connections opened (successful or not).
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Make the next `n` opens fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Instants of every open attempt.
    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times.lock().clone()
    }

    fn key(&self, symbol: &str) -> String {
        self.provider.symbol_key(&Symbol::parse(symbol).unwrap())
    }

    fn send(&self, symbol: &str, frame: Result<UpstreamFrame, FeedError>) -> bool {
        self.feeds
            .lock()
            .get(&self.key(symbol))
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Feed a text payload into the open connection for `symbol`.
    pub fn push(&self, symbol: &str, payload: impl Into<String>) -> bool {
        self.send(symbol, Ok(UpstreamFrame::Text(payload.into())))
    }

    /// Signal a deliberate end of stream.
    pub fn end(&self, symbol: &str) -> bool {
        self.send(symbol, Ok(UpstreamFrame::End))
    }

    /// Feed a transport-level heartbeat.
    pub fn heartbeat(&self, symbol: &str) -> bool {
        self.send(symbol, Ok(UpstreamFrame::Heartbeat))
    }

    /// Fail the open connection with a transport error.
    pub fn break_connection(&self, symbol: &str) -> bool {
        self.send(symbol, Err(FeedError::WebSocket("reset by peer".to_string())))
    }
}

#[async_trait]
impl FeedConnector for ScriptedConnector {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn preflight(&self) -> Result<(), FeedError> {
        match &self.credential {
            Some(credential) if !credential.is_set() => {
                Err(FeedError::MissingCredential(self.provider))
            }
            _ => Ok(()),
        }
    }

    async fn open(&self, symbol: &Symbol) -> Result<FrameStream, FeedError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_times.lock().push(Instant::now());

        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(FeedError::Connect("scripted failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .insert(self.provider.symbol_key(symbol), tx);

        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        let frames = UnboundedReceiverStream::new(rx).map(move |frame| {
            let _alive = &guard;
            frame
        });

        Ok(Box::pin(frames))
    }

    fn decode(&self, symbol: &Symbol, payload: &str) -> Vec<Result<DecodedRecord, CodecError>> {
        match self.provider {
            Provider::Crypto => BinanceCodec::new().decode(symbol, payload),
            Provider::Equities => TradierCodec::new().decode(symbol, payload),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

pub fn binance_trade(symbol: &str, price: &str, trade_time: i64) -> String {
    format!(
        r#"{{"e":"trade","E":{trade_time},"s":"{symbol}","t":1,"p":"{price}","q":"0.5","T":{trade_time},"m":false}}"#
    )
}

pub fn tradier_quote(symbol: &str, bid: f64, ask: f64) -> String {
    format!(
        r#"{{"type":"quote","symbol":"{symbol}","bid":{bid},"bidsz":1,"biddate":"1700000000000","ask":{ask},"asksz":1,"askdate":"1700000000000"}}"#
    )
}

// =============================================================================
// Harness
// =============================================================================

/// Settings with fast retries and no idle watchdog.
pub fn fast_settings() -> StreamSettings {
    StreamSettings {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        },
        idle_timeout: None,
        capacity: 64,
    }
}

pub fn source(connector: &Arc<ScriptedConnector>, settings: StreamSettings) -> Arc<UpstreamFeedSource> {
    Arc::new(UpstreamFeedSource::new(
        Arc::clone(connector) as Arc<dyn FeedConnector>,
        settings,
    ))
}

/// A complete relay without the network layer.
pub struct Relay {
    pub crypto: Arc<ScriptedConnector>,
    pub equities: Arc<ScriptedConnector>,
    pub credential: Arc<SessionCredential>,
    pub crypto_source: Arc<UpstreamFeedSource>,
    pub equities_source: Arc<UpstreamFeedSource>,
    pub tickers: Arc<Gateway>,
    pub crypto_gateway: Arc<Gateway>,
}

impl Relay {
    pub fn new(session_id: Option<&str>) -> Self {
        Self::with_settings(session_id, fast_settings())
    }

    pub fn with_settings(session_id: Option<&str>, settings: StreamSettings) -> Self {
        let credential = Arc::new(SessionCredential::with_session_id(
            session_id.map(str::to_string),
        ));
        let crypto = ScriptedConnector::crypto();
        let equities = ScriptedConnector::equities(Arc::clone(&credential));

        let crypto_source = source(&crypto, settings.clone());
        let equities_source = source(&equities, settings);

        let tickers = Gateway::new(
            GatewayNamespace::Tickers,
            [
                Arc::clone(&crypto_source) as Arc<dyn TickSource>,
                Arc::clone(&equities_source) as Arc<dyn TickSource>,
            ],
        );
        let crypto_gateway = Gateway::new(
            GatewayNamespace::Crypto,
            [Arc::clone(&crypto_source) as Arc<dyn TickSource>],
        );

        Self {
            crypto,
            equities,
            credential,
            crypto_source,
            equities_source,
            tickers,
            crypto_gateway,
        }
    }
}

/// Connect a session and consume its `ready` event.
pub async fn connect(gateway: &Gateway, session_id: &str) -> mpsc::Receiver<ServerEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    gateway.on_connect(session_id, tx);
    match next_event(&mut rx).await {
        ServerEvent::Ready { id } => assert_eq!(id, session_id),
        other => panic!("expected ready, got {other:?}"),
    }
    rx
}

pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("session queue closed")
}

pub async fn assert_quiet(rx: &mut mpsc::Receiver<ServerEvent>) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

pub async fn next_stream_event(events: &mut EventReceiver) -> StreamEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("stream closed")
}

/// Poll until `check` holds.
pub async fn eventually(check: impl Fn() -> bool) {
    eventually_within(Duration::from_secs(5), check).await;
}

/// Poll until `check` holds, giving up after `limit`.
pub async fn eventually_within(limit: Duration, check: impl Fn() -> bool) {
    timeout(limit, async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
