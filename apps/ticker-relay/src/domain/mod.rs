//! Domain Layer - Core relay types and business rules.
//!
//! This layer contains the core domain types for tick relaying with no I/O.
//! All types here are pure Rust with serialization support.

/// Market data types (providers, symbols, ticks).
pub mod streaming;

/// Provider resolution for symbols.
pub mod routing;

/// Downstream wire protocol.
pub mod protocol;

/// Symbol group membership tracking.
pub mod subscription;
