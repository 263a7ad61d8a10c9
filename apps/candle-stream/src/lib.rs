#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Candle Stream - Real-Time Bar Recorder
//!
//! Connects to an Interactive Brokers TWS or IB Gateway session, subscribes
//! to 5-second real-time bars for a list of tickers, and appends every bar
//! to `<OUTPUT_DIR>/<TICKER>.csv`.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core recording types
//!   - `streaming`: The 5-second bar
//!   - `subscription`: Symbols, request ids, and the subscription set
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Gateway and bar sink interfaces, gateway events
//!   - `services`: The recorder event loop and shutdown sequence
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `ibkr`: Gateway adapter over the `ibapi` client
//!   - `storage`: Per-symbol CSV files
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐  GatewayEvent  ┌────────────┐
//! TWS / Gateway ──►│ IbkrGateway  │───────────────►│  Recorder  │──► SPY.csv
//!   (TCP 7496) ◄───│ stream/symbol│  bounded mpsc  │ event loop │──► QQQ.csv
//!                  └──────────────┘                └────────────┘──► ...
//!                         ▲                              │
//!                         └──── subscribe / cancel ──────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core recording types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{BAR_SIZE_SECS, Bar};
pub use domain::subscription::{
    RequestId, Subscription, SubscriptionSet, SubscriptionStats, SubscriptionStatus, Symbol,
    SymbolError, default_symbols, parse_symbols,
};

// Ports and services
pub use application::ports::{BarSink, GatewayError, GatewayEvent, MarketDataGateway, WriteError};
pub use application::services::{
    Recorder, RecorderError, RecorderState, RecorderStats, ShutdownReason,
};

// Infrastructure config
pub use infrastructure::config::{
    BarSettings, ConfigError, GatewaySettings, RecorderConfig, WhatToShow,
};

// Adapters
pub use infrastructure::ibkr::IbkrGateway;
pub use infrastructure::storage::CsvBarWriter;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
