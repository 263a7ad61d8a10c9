//! Domain Layer - Core recording types.
//!
//! This layer contains the bar value type and the subscription set with
//! no dependencies on the gateway transport or the file system.

/// Market data types (5-second bars).
pub mod streaming;

/// Symbols, request ids, and subscription tracking.
pub mod subscription;
