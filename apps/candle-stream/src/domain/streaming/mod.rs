//! Market Data Streaming Types
//!
//! The canonical in-process representation of a real-time bar. Bars are
//! codec-agnostic: the gateway adapter decodes into them and the storage
//! adapter encodes out of them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Length of one real-time bar window, in seconds.
pub const BAR_SIZE_SECS: u32 = 5;

/// Aggregated price/volume summary over one 5-second window.
///
/// Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bar {
    /// Start of the bar window.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume (shares).
    pub volume: i64,
}

impl Bar {
    /// Create a new bar.
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Whether the prices are internally consistent (low <= open/close <= high).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.low <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
            && self.volume >= 0
    }
}
