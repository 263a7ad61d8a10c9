//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataGateway`: Subscription requests to the brokerage gateway
//! - `BarSink`: Durable storage for received bars
//!
//! ## Events (Inbound)
//!
//! - `GatewayEvent`: Everything the gateway pushes back (bars, rejections,
//!   warnings, disconnects), delivered over a bounded channel.

mod bar_sink_port;
mod gateway_port;

pub use bar_sink_port::{BarSink, WriteError};
pub use gateway_port::{GatewayError, GatewayEvent, MarketDataGateway};
