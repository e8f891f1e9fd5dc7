//! Ticker Relay Binary
//!
//! Starts the market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `TRADIER_SESSION_ID`: Tradier streaming session id (equities disabled without it)
//! - `TRADIER_STREAM_URL`: Tradier stream host and path (default: ws.tradier.com/v1/markets/events)
//! - `TRADIER_STREAM_WSS`: Full Tradier stream URL, overrides `TRADIER_STREAM_URL`
//! - `BINANCE_STREAM_URL`: Binance stream base URL (default: <wss://stream.binance.com:9443/ws>)
//! - `RELAY_WS_PORT`: Downstream WebSocket port (default: 8080)
//! - `RELAY_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `RELAY_RECONNECT_DELAY_INITIAL_MS`, `RELAY_RECONNECT_DELAY_MAX_SECS`,
//!   `RELAY_RECONNECT_DELAY_MULTIPLIER`, `RELAY_RECONNECT_JITTER`,
//!   `RELAY_MAX_RECONNECT_ATTEMPTS`: Upstream backoff tuning
//! - `RELAY_IDLE_TIMEOUT_SECS`: Recycle silent upstream connections, 0 disables (default: 600)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_relay::infrastructure::telemetry;
use ticker_relay::{
    BinanceConnector, FeedConnector, Gateway, GatewayNamespace, RelayConfig, RelayServer,
    ServerState, SessionCredential, StreamSettings, TickSource, TradierConnector,
    UpstreamFeedSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Ticker Relay");

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    init_metrics(config.server.metrics_port).context("failed to install metrics exporter")?;

    let shutdown_token = CancellationToken::new();

    // Upstream connectors
    let credential = Arc::new(SessionCredential::with_session_id(
        config.venues.tradier_session_id().map(str::to_string),
    ));
    if !credential.is_set() {
        tracing::warn!("TRADIER_SESSION_ID not set, equities subscriptions will be rejected");
    }

    let binance: Arc<dyn FeedConnector> =
        Arc::new(BinanceConnector::new(config.venues.binance_stream_url.clone()));
    let tradier: Arc<dyn FeedConnector> = Arc::new(TradierConnector::new(
        config.venues.tradier_stream_url.clone(),
        Arc::clone(&credential),
    ));

    // One multiplexer per provider, shared by both namespaces
    let stream_settings = StreamSettings::from_settings(&config.upstream);
    let crypto_source = Arc::new(UpstreamFeedSource::new(binance, stream_settings.clone()));
    let equities_source = Arc::new(UpstreamFeedSource::new(tradier, stream_settings));

    let tickers = Gateway::new(
        GatewayNamespace::Tickers,
        [
            Arc::clone(&crypto_source) as Arc<dyn TickSource>,
            Arc::clone(&equities_source) as Arc<dyn TickSource>,
        ],
    );
    let crypto = Gateway::new(
        GatewayNamespace::Crypto,
        [Arc::clone(&crypto_source) as Arc<dyn TickSource>],
    );

    let state = Arc::new(ServerState::new(
        tickers,
        crypto,
        config.server.session_queue,
        shutdown_token.clone(),
    ));
    let server = RelayServer::new(config.server.ws_port, state, shutdown_token.clone());

    let mut server_task = tokio::spawn(server.run());

    tracing::info!("Ticker relay ready");

    let early_exit = tokio::select! {
        () = await_shutdown() => None,
        result = &mut server_task => Some(result),
    };

    shutdown_token.cancel();

    let result = match early_exit {
        Some(result) => Ok(result),
        None => tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await,
    };

    crypto_source.shutdown();
    equities_source.shutdown();

    match result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e).context("relay server failed"),
        Ok(Err(e)) => return Err(e).context("relay server task panicked"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Relay server did not stop in time"
        ),
    }

    tracing::info!("Ticker relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        metrics_port = config.server.metrics_port,
        max_reconnect_attempts = config.upstream.max_reconnect_attempts,
        equities_enabled = config.venues.tradier_session_id().is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        binance_stream_url = %config.venues.binance_stream_url,
        tradier_stream_url = %config.venues.tradier_stream_url,
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
