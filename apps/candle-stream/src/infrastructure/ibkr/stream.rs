//! Real-Time Bar Stream Worker
//!
//! `ibapi` subscriptions are blocking iterators, so each symbol runs on its
//! own thread and forwards bars into the recorder's channel with
//! `blocking_send`. The worker polls with a timeout so a cancel request is
//! seen within [`POLL_INTERVAL`].

use std::time::{Duration, Instant};

use chrono::DateTime;
use ibapi::Client;
use ibapi::Error;
use ibapi::contracts::Contract;
use ibapi::market_data::realtime::{self, BarSize};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{GatewayError, GatewayEvent};
use crate::domain::streaming::Bar;
use crate::domain::subscription::{RequestId, Symbol};
use crate::infrastructure::config::{BarSettings, WhatToShow};

/// Longest wait for a bar before re-checking for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Decimal places kept when converting `f64` prices.
const PRICE_SCALE: u32 = 8;

/// Code reported for client-side failures that carry no gateway code.
const NO_CODE: i32 = -1;

// =============================================================================
// Error Classification
// =============================================================================

/// How a subscription error affects its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Warning; bars keep flowing.
    Warning {
        /// Gateway code.
        code: i32,
        /// Gateway message.
        message: String,
    },
    /// The gateway refused or ended this subscription.
    Rejected {
        /// Gateway code, or -1 for client-side errors.
        code: i32,
        /// Error text.
        message: String,
    },
    /// The connection to the gateway was reset.
    ConnectionLost(String),
}

/// Classify an error reported on a bar subscription.
#[must_use]
pub fn classify_error(error: &Error) -> StreamError {
    match error {
        Error::ConnectionReset => StreamError::ConnectionLost("connection reset".to_string()),
        Error::Message(code, message) if is_warning(*code) => StreamError::Warning {
            code: *code,
            message: message.clone(),
        },
        Error::Message(code, message) => StreamError::Rejected {
            code: *code,
            message: message.clone(),
        },
        other => StreamError::Rejected {
            code: NO_CODE,
            message: other.to_string(),
        },
    }
}

/// Codes that leave a subscription streaming: order-style warnings, farm
/// status messages, and delayed or partial market data notices.
const fn is_warning(code: i32) -> bool {
    matches!(code, 399 | 2100..=2199 | 10090 | 10091 | 10167)
}

// =============================================================================
// Bar Conversion
// =============================================================================

const fn bar_type(what_to_show: WhatToShow) -> realtime::WhatToShow {
    match what_to_show {
        WhatToShow::Trades => realtime::WhatToShow::Trades,
        WhatToShow::Midpoint => realtime::WhatToShow::MidPoint,
        WhatToShow::Bid => realtime::WhatToShow::Bid,
        WhatToShow::Ask => realtime::WhatToShow::Ask,
    }
}

fn price(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(PRICE_SCALE).normalize())
}

/// Build a domain bar from raw `ibapi` values.
///
/// Returns `None` for a timestamp or price that does not convert.
#[must_use]
pub fn bar_from_parts(unix_secs: i64, ohlc: [f64; 4], volume: f64) -> Option<Bar> {
    let [open, high, low, close] = ohlc;
    Some(Bar::new(
        DateTime::from_timestamp(unix_secs, 0)?,
        price(open)?,
        price(high)?,
        price(low)?,
        price(close)?,
        Decimal::from_f64(volume)?.trunc().to_i64()?,
    ))
}

fn convert(bar: &realtime::Bar) -> Option<Bar> {
    bar_from_parts(
        bar.date.unix_timestamp(),
        [bar.open, bar.high, bar.low, bar.close],
        bar.volume,
    )
}

// =============================================================================
// Worker
// =============================================================================

/// One symbol's subscription, run on a dedicated thread.
pub struct BarStream {
    /// Request id the recorder knows this subscription by.
    pub request_id: RequestId,
    /// Subscribed symbol.
    pub symbol: Symbol,
    /// Bar request settings.
    pub settings: BarSettings,
    /// Recorder event channel.
    pub events: mpsc::Sender<GatewayEvent>,
    /// Cancelled by `cancel_bars` or `disconnect`.
    pub stop: CancellationToken,
}

impl BarStream {
    /// Request the subscription, report the outcome on `started`, then
    /// forward bars until cancelled or the stream fails.
    pub fn run(self, client: &Client, started: oneshot::Sender<Result<(), GatewayError>>) {
        let contract = Contract::stock(self.symbol.as_str());
        let subscription = match client.realtime_bars(
            &contract,
            BarSize::Sec5,
            bar_type(self.settings.what_to_show),
            self.settings.use_rth,
        ) {
            Ok(subscription) => {
                let _ = started.send(Ok(()));
                subscription
            }
            Err(e) => {
                let _ = started.send(Err(GatewayError::Request(e.to_string())));
                return;
            }
        };

        let mut reported_warning = None;
        loop {
            if self.stop.is_cancelled() {
                subscription.cancel();
                tracing::debug!(symbol = %self.symbol, "Bar stream cancelled");
                return;
            }

            let polled_at = Instant::now();
            if let Some(bar) = subscription.next_timeout(POLL_INTERVAL) {
                if !self.forward(&bar) {
                    return;
                }
                continue;
            }

            match subscription.error().map(|e| classify_error(&e)) {
                Some(StreamError::Warning { code, message }) if reported_warning != Some(code) => {
                    reported_warning = Some(code);
                    if !self.emit(GatewayEvent::Notice { code, message }) {
                        return;
                    }
                }
                Some(StreamError::Rejected { code, message }) => {
                    self.emit(GatewayEvent::SubscriptionRejected {
                        request_id: self.request_id,
                        code,
                        message,
                    });
                    return;
                }
                Some(StreamError::ConnectionLost(reason)) => {
                    self.emit(GatewayEvent::Disconnected { reason });
                    return;
                }
                // A poll that returns early with nothing new means the stream is closed.
                _ if polled_at.elapsed() < POLL_INTERVAL / 2 && !self.stop.is_cancelled() => {
                    self.emit(GatewayEvent::Disconnected {
                        reason: format!("bar stream for {} ended", self.symbol),
                    });
                    return;
                }
                _ => {}
            }
        }
    }

    fn forward(&self, bar: &realtime::Bar) -> bool {
        match convert(bar) {
            Some(bar) => self.emit(GatewayEvent::Bar {
                request_id: self.request_id,
                bar,
            }),
            None => {
                tracing::warn!(symbol = %self.symbol, ?bar, "Dropping bar that does not convert");
                true
            }
        }
    }

    /// Send an event. Returns `false` once the recorder is gone.
    fn emit(&self, event: GatewayEvent) -> bool {
        self.events.blocking_send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(2104; "farm connection ok")]
    #[test_case(10_091; "partial data not subscribed")]
    #[test_case(10_167; "displaying delayed data")]
    #[test_case(399; "order warning")]
    fn warnings_keep_streaming(code: i32) {
        let outcome = classify_error(&Error::Message(code, "warning".to_string()));
        assert!(matches!(outcome, StreamError::Warning { code: c, .. } if c == code));
    }

    #[test_case(200; "no security definition")]
    #[test_case(354; "not subscribed")]
    #[test_case(420; "invalid real-time query")]
    fn errors_reject_the_subscription(code: i32) {
        let outcome = classify_error(&Error::Message(code, "refused".to_string()));
        assert!(matches!(outcome, StreamError::Rejected { code: c, .. } if c == code));
    }

    #[test]
    fn connection_reset_is_a_disconnect() {
        assert!(matches!(
            classify_error(&Error::ConnectionReset),
            StreamError::ConnectionLost(_)
        ));
    }

    #[test]
    fn bar_prices_keep_received_precision() {
        let bar = bar_from_parts(1_704_205_800, [187.15, 187.25, 187.1, 187.2], 1_200.0).unwrap();
        assert_eq!(bar.timestamp.timestamp(), 1_704_205_800);
        assert_eq!(bar.open.to_string(), "187.15");
        assert_eq!(bar.low.to_string(), "187.1");
        assert_eq!(bar.volume, 1_200);
    }

    #[test]
    fn non_finite_price_is_dropped() {
        assert!(bar_from_parts(1_704_205_800, [f64::NAN, 1.0, 1.0, 1.0], 10.0).is_none());
    }

    #[test]
    fn fractional_volume_is_truncated() {
        let bar = bar_from_parts(1_704_205_800, [1.0, 1.0, 1.0, 1.0], 12.9).unwrap();
        assert_eq!(bar.volume, 12);
    }
}
