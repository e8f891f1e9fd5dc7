//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Received per provider, delivered to sessions, lagged
//! - **Upstream**: Live connections, reconnect attempts, malformed records
//! - **Streams**: Active shared streams per provider
//! - **Downstream**: Connected sessions and held subscriptions
//!
//! # Integration
//!
//! The exporter serves `/metrics` on its own HTTP listener
//! (`RELAY_METRICS_PORT`). With port 0 the recorder is installed without a
//! listener so recording still works.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::streaming::Provider;

// =============================================================================
// Initialization
// =============================================================================

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder, with an HTTP listener when `port` is set.
///
/// Subsequent calls are no-ops. Must be called from within a Tokio runtime
/// when a listener is requested.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    if port == 0 {
        builder.install_recorder()?;
        tracing::info!("Metrics recorder installed without listener");
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        builder.with_http_listener(addr).install()?;
        tracing::info!(%addr, "Metrics endpoint listening");
    }

    let _ = INSTALLED.set(());
    register_metrics();
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(
        "ticker_relay_ticks_received_total",
        "Total ticks decoded from upstream feeds"
    );
    describe_counter!(
        "ticker_relay_ticks_delivered_total",
        "Total ticks written to downstream session queues"
    );
    describe_counter!(
        "ticker_relay_ticks_lagged_total",
        "Total ticks skipped by subscribers that fell behind"
    );

    // Upstream
    describe_gauge!(
        "ticker_relay_upstream_connections",
        "Number of open upstream connections"
    );
    describe_counter!(
        "ticker_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_counter!(
        "ticker_relay_malformed_records_total",
        "Total upstream records that failed to decode"
    );
    describe_gauge!(
        "ticker_relay_active_streams",
        "Number of shared upstream streams"
    );

    // Downstream
    describe_gauge!(
        "ticker_relay_sessions",
        "Number of connected downstream sessions"
    );
    describe_gauge!(
        "ticker_relay_subscriptions",
        "Number of (session, symbol) subscriptions held"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick decoded from a provider.
pub fn record_tick_received(provider: Provider) {
    counter!(
        "ticker_relay_ticks_received_total",
        "provider" => provider.as_str()
    )
    .increment(1);
}

/// Record a record that failed to decode.
pub fn record_malformed(provider: Provider) {
    counter!(
        "ticker_relay_malformed_records_total",
        "provider" => provider.as_str()
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect(provider: Provider) {
    counter!(
        "ticker_relay_reconnects_total",
        "provider" => provider.as_str()
    )
    .increment(1);
}

/// Record an upstream connection opening.
pub fn record_upstream_connected(provider: Provider) {
    gauge!(
        "ticker_relay_upstream_connections",
        "provider" => provider.as_str()
    )
    .increment(1.0);
}

/// Record an upstream connection closing.
pub fn record_upstream_disconnected(provider: Provider) {
    gauge!(
        "ticker_relay_upstream_connections",
        "provider" => provider.as_str()
    )
    .decrement(1.0);
}

/// Update the shared stream count for a provider.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(provider: Provider, count: usize) {
    gauge!(
        "ticker_relay_active_streams",
        "provider" => provider.as_str()
    )
    .set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
