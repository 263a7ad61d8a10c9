//! Interactive Brokers Adapter
//!
//! Implements the gateway port on top of the `ibapi` client.
//!
//! # Modules
//!
//! - `client`: [`IbkrGateway`], connection and per-symbol stream workers
//! - `stream`: One blocking real-time bar subscription feeding the event channel

pub mod client;
pub mod stream;

pub use client::IbkrGateway;
pub use stream::{StreamError, classify_error};
