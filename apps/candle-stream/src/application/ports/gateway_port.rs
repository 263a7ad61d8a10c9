//! Market Data Gateway Port (Driven Port)
//!
//! Interface for requesting and cancelling real-time bar subscriptions.
//! Responses are not returned from these calls: the gateway pushes them
//! back asynchronously as [`GatewayEvent`]s.

use async_trait::async_trait;

use crate::domain::streaming::Bar;
use crate::domain::subscription::{RequestId, Symbol};

/// Events pushed by the gateway adapter to the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A completed 5-second bar for a subscription.
    Bar {
        /// Request id the bar was delivered under.
        request_id: RequestId,
        /// The bar.
        bar: Bar,
    },
    /// The gateway refused (or terminated) a subscription.
    SubscriptionRejected {
        /// Request id of the refused subscription.
        request_id: RequestId,
        /// Gateway error code.
        code: i32,
        /// Gateway error message.
        message: String,
    },
    /// Warning or informational message that does not end a subscription.
    Notice {
        /// Gateway message code.
        code: i32,
        /// Gateway message text.
        message: String,
    },
    /// The connection to the gateway is gone.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Could not establish the connection.
    #[error("failed to connect to gateway at {addr}: {reason}")]
    ConnectionFailed {
        /// Gateway address.
        addr: String,
        /// Cause.
        reason: String,
    },

    /// The gateway refused a request outright.
    #[error("gateway request failed: {0}")]
    Request(String),

    /// A stream worker could not be started.
    #[error("failed to start bar stream: {0}")]
    Io(#[from] std::io::Error),

    /// Bar streams did not stop in time.
    #[error("gateway shutdown incomplete: {0}")]
    Shutdown(String),

    /// The connection has already been closed.
    #[error("not connected to gateway")]
    NotConnected,
}

/// Outbound port to the brokerage gateway.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Request a streaming 5-second bar subscription for `symbol`.
    ///
    /// Fire-and-forget: an `Ok` only means the request was sent. Rejections
    /// arrive later as [`GatewayEvent::SubscriptionRejected`].
    async fn subscribe_bars(
        &self,
        request_id: RequestId,
        symbol: &Symbol,
    ) -> Result<(), GatewayError>;

    /// Cancel the subscription held under `request_id`.
    async fn cancel_bars(&self, request_id: RequestId) -> Result<(), GatewayError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), GatewayError>;
}
