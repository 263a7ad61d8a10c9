//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the recorder service and the port interfaces
//! that define how it interacts with the gateway and the bar store.

/// Port interfaces for external systems (gateway, bar sink).
pub mod ports;

/// Application services driving the recording loop.
pub mod services;
