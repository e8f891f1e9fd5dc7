//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the downstream gateway and the port interfaces
//! that define how it reaches the upstream multiplexers.

/// Port interfaces for external systems (upstream feeds, tick sources).
pub mod ports;

/// Per-connection subscription registry and command handling.
pub mod gateway;
