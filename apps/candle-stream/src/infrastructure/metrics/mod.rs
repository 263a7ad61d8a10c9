//! Prometheus Metrics Module
//!
//! Recording-session metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Bars**: Bars written and write failures per symbol, write latency
//! - **Subscriptions**: Subscription counts by status
//! - **Gateway**: Notices by code, disconnects
//!
//! # Integration
//!
//! The exporter is optional. When `CANDLE_STREAM_METRICS_PORT` is non-zero,
//! `/metrics` is served on that port. Otherwise the recording functions are
//! no-ops.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::subscription::{SubscriptionStats, Symbol};

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime. Calling it again after a
/// successful install is a no-op.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    let _ = INSTALLED.set(addr);
    tracing::info!(addr = %addr, "Prometheus metrics listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "candle_stream_bars_written_total",
        "Bars appended to CSV files"
    );
    describe_counter!(
        "candle_stream_write_failures_total",
        "Bars lost to CSV write failures"
    );
    describe_histogram!(
        "candle_stream_write_seconds",
        "Time to append one bar"
    );

    describe_gauge!(
        "candle_stream_subscriptions",
        "Subscriptions by status"
    );

    describe_counter!(
        "candle_stream_gateway_notices_total",
        "Gateway notices by code"
    );
    describe_counter!(
        "candle_stream_disconnects_total",
        "Unrequested gateway disconnects"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a bar appended for `symbol`.
pub fn record_bar_written(symbol: &Symbol) {
    counter!(
        "candle_stream_bars_written_total",
        "symbol" => symbol.as_str().to_string()
    )
    .increment(1);
}

/// Record a bar lost to a write failure.
pub fn record_write_failure(symbol: &Symbol) {
    counter!(
        "candle_stream_write_failures_total",
        "symbol" => symbol.as_str().to_string()
    )
    .increment(1);
}

/// Record how long one append took.
pub fn record_write_duration(duration: Duration) {
    histogram!("candle_stream_write_seconds").record(duration.as_secs_f64());
}

/// Publish subscription counts.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(stats: &SubscriptionStats) {
    for (status, count) in [
        ("requested", stats.requested),
        ("streaming", stats.streaming),
        ("rejected", stats.rejected),
    ] {
        gauge!("candle_stream_subscriptions", "status" => status).set(count as f64);
    }
}

/// Record a gateway notice.
pub fn record_gateway_notice(code: i32) {
    counter!(
        "candle_stream_gateway_notices_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record an unrequested disconnect.
pub fn record_disconnect() {
    counter!("candle_stream_disconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_a_noop() {
        let symbol = Symbol::parse("SPY").unwrap();
        record_bar_written(&symbol);
        record_write_failure(&symbol);
        record_write_duration(Duration::from_micros(40));
        set_subscriptions(&SubscriptionStats {
            total: 2,
            requested: 1,
            streaming: 1,
            rejected: 0,
        });
        record_gateway_notice(2104);
        record_disconnect();
    }
}
