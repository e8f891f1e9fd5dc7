//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Downstream WebSocket server.
pub mod server;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Upstream venue feeds and the per-symbol multiplexer.
pub mod upstream;
