//! Bar Recorder Service
//!
//! The recorder is the context object for one recording session. It owns the
//! gateway handle, the subscription set, and the bar sink, and drains gateway
//! events from a bounded channel in a single consumer loop.
//!
//! # State Machine
//!
//! ```text
//! CONNECTED ──(interrupt | connection lost)──► SHUTTING_DOWN (terminal)
//! ```
//!
//! Cancellation is only observed between events, so a bar is either fully
//! appended or not touched.

use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BarSink, GatewayEvent, MarketDataGateway};
use crate::domain::streaming::Bar;
use crate::domain::subscription::{RequestId, SubscriptionSet};
use crate::infrastructure::metrics;

/// Rejection code recorded when a subscribe request could not be sent at all.
const LOCAL_SEND_FAILURE: i32 = -1;

// =============================================================================
// Types
// =============================================================================

/// Process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Subscriptions active, accepting bar events.
    Connected,
    /// Flushing and closing.
    ShuttingDown,
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Interrupt or terminate signal.
    Interrupted,
    /// The gateway connection was lost mid-session.
    ConnectionLost(String),
}

impl ShutdownReason {
    /// Whether the session ended on request rather than on failure.
    #[must_use]
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Bars appended to the sink.
    pub bars_written: u64,
    /// Bars lost to write failures.
    pub write_failures: u64,
    /// Bars ignored because their request id is unknown or rejected.
    pub bars_ignored: u64,
}

/// Recorder errors.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// No symbols were configured.
    #[error("no symbols configured")]
    NoSymbols,
    /// Every subscription request failed to send.
    #[error("no subscription requests could be sent ({failed} failed)")]
    NoSubscriptions {
        /// Number of failed requests.
        failed: usize,
    },
}

// =============================================================================
// Recorder
// =============================================================================

/// Recording session context.
pub struct Recorder<G, S> {
    gateway: G,
    sink: S,
    subscriptions: SubscriptionSet,
    state: RecorderState,
    stats: RecorderStats,
}

impl<G, S> Recorder<G, S>
where
    G: MarketDataGateway,
    S: BarSink,
{
    /// Create a recorder over a connected gateway.
    #[must_use]
    pub const fn new(gateway: G, sink: S, subscriptions: SubscriptionSet) -> Self {
        Self {
            gateway,
            sink,
            subscriptions,
            state: RecorderState::Connected,
            stats: RecorderStats {
                bars_written: 0,
                write_failures: 0,
                bars_ignored: 0,
            },
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RecorderState {
        self.state
    }

    /// Session counters.
    #[must_use]
    pub const fn stats(&self) -> RecorderStats {
        self.stats
    }

    /// The subscription set.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// The gateway handle.
    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Run a full session: subscribe, record until interrupted or
    /// disconnected, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to subscribe or every subscribe
    /// request failed. The gateway is disconnected and the sink closed in
    /// every case.
    pub async fn run(
        &mut self,
        events: &mut mpsc::Receiver<GatewayEvent>,
        shutdown: &CancellationToken,
    ) -> Result<ShutdownReason, RecorderError> {
        match self.subscribe_all(shutdown).await {
            Ok(count) => {
                tracing::info!(
                    count,
                    total = self.subscriptions.len(),
                    "Streaming 5-second bars, press Ctrl+C to stop"
                );
            }
            Err(e) => {
                self.shutdown(false, events).await;
                return Err(e);
            }
        }

        let reason = self.event_loop(events, shutdown).await;
        self.shutdown(reason.is_graceful(), events).await;
        Ok(reason)
    }

    /// Send a subscribe request for every live subscription.
    ///
    /// Individual failures are logged and the symbol is marked rejected.
    /// Stops early once `shutdown` is cancelled. Returns the number of
    /// requests sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is empty or, without a shutdown request,
    /// no request could be sent.
    pub async fn subscribe_all(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<usize, RecorderError> {
        if self.subscriptions.is_empty() {
            return Err(RecorderError::NoSymbols);
        }

        let mut sent = 0;
        let mut failed = 0;

        for (request_id, symbol) in self.subscriptions.live() {
            if shutdown.is_cancelled() {
                tracing::info!(sent, "Shutdown requested while subscribing");
                break;
            }
            match self.gateway.subscribe_bars(request_id, &symbol).await {
                Ok(()) => {
                    sent += 1;
                    tracing::info!(symbol = %symbol, request_id, "Requested 5-second bars");
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        symbol = %symbol,
                        request_id,
                        error = %e,
                        "Failed to request bars, skipping symbol"
                    );
                    self.subscriptions
                        .mark_rejected(request_id, LOCAL_SEND_FAILURE, e.to_string());
                }
            }
        }

        metrics::set_subscriptions(&self.subscriptions.stats());

        if sent == 0 && !shutdown.is_cancelled() {
            return Err(RecorderError::NoSubscriptions { failed });
        }
        Ok(sent)
    }

    /// Drain events until a shutdown signal or a connection loss.
    pub async fn event_loop(
        &mut self,
        events: &mut mpsc::Receiver<GatewayEvent>,
        shutdown: &CancellationToken,
    ) -> ShutdownReason {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    return ShutdownReason::Interrupted;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::error!("Gateway event channel closed");
                        return ShutdownReason::ConnectionLost(
                            "gateway event channel closed".to_string(),
                        );
                    };
                    if let Some(reason) = self.handle_event(event).await {
                        return reason;
                    }
                }
            }
        }
    }

    /// Dispatch one gateway event.
    ///
    /// Returns a shutdown reason if the event ends the session.
    pub async fn handle_event(&mut self, event: GatewayEvent) -> Option<ShutdownReason> {
        match event {
            GatewayEvent::Bar { request_id, bar } => {
                self.record_bar(request_id, &bar);
            }
            GatewayEvent::SubscriptionRejected {
                request_id,
                code,
                message,
            } => {
                self.reject(request_id, code, message);
            }
            GatewayEvent::Notice { code, message } => {
                metrics::record_gateway_notice(code);
                tracing::info!(code, msg = %message, "Gateway notice");
            }
            GatewayEvent::Disconnected { reason } => {
                metrics::record_disconnect();
                tracing::error!(reason = %reason, "Gateway connection lost");
                return Some(ShutdownReason::ConnectionLost(reason));
            }
        }
        None
    }

    /// Append a bar to its symbol's file.
    fn record_bar(&mut self, request_id: RequestId, bar: &Bar) {
        let Some(sub) = self.subscriptions.get(request_id) else {
            self.stats.bars_ignored += 1;
            tracing::debug!(request_id, "Bar for unknown request id, ignoring");
            return;
        };
        if !sub.is_live() {
            self.stats.bars_ignored += 1;
            tracing::debug!(symbol = %sub.symbol, "Bar for rejected subscription, ignoring");
            return;
        }
        let symbol = sub.symbol.clone();

        if self.subscriptions.mark_streaming(request_id) {
            tracing::info!(symbol = %symbol, "First bar received");
            metrics::set_subscriptions(&self.subscriptions.stats());
        }

        if !bar.is_consistent() {
            tracing::warn!(symbol = %symbol, ?bar, "Recording inconsistent bar");
        }

        let started = Instant::now();
        match self.sink.append(&symbol, bar) {
            Ok(()) => {
                self.stats.bars_written += 1;
                metrics::record_bar_written(&symbol);
                metrics::record_write_duration(started.elapsed());
                tracing::trace!(
                    symbol = %symbol,
                    timestamp = %bar.timestamp,
                    close = %bar.close,
                    volume = bar.volume,
                    "Bar written"
                );
            }
            Err(e) => {
                self.stats.write_failures += 1;
                metrics::record_write_failure(&symbol);
                tracing::error!(
                    symbol = %symbol,
                    timestamp = %bar.timestamp,
                    error = %e,
                    "Failed to write bar, dropping it"
                );
            }
        }
    }

    fn reject(&mut self, request_id: RequestId, code: i32, message: String) {
        match self.subscriptions.mark_rejected(request_id, code, message.clone()) {
            Some(symbol) => {
                tracing::warn!(
                    symbol = %symbol,
                    code,
                    msg = %message,
                    "Subscription rejected, skipping symbol"
                );
                metrics::set_subscriptions(&self.subscriptions.stats());
            }
            None => {
                tracing::warn!(request_id, code, msg = %message, "Gateway error for unknown request");
            }
        }
    }

    /// Enter `ShuttingDown`: cancel subscriptions (when the connection is
    /// still usable), disconnect, write bars already queued, close the sink.
    pub async fn shutdown(
        &mut self,
        cancel_subscriptions: bool,
        events: &mut mpsc::Receiver<GatewayEvent>,
    ) {
        self.state = RecorderState::ShuttingDown;
        tracing::info!("Shutting down");

        if cancel_subscriptions {
            for (request_id, symbol) in self.subscriptions.live() {
                if let Err(e) = self.gateway.cancel_bars(request_id).await {
                    tracing::warn!(symbol = %symbol, error = %e, "Failed to cancel subscription");
                }
            }
        }

        if let Err(e) = self.gateway.disconnect().await {
            tracing::warn!(error = %e, "Failed to disconnect cleanly");
        }

        let mut drained = 0_u64;
        while let Ok(event) = events.try_recv() {
            if let GatewayEvent::Bar { request_id, bar } = event {
                self.record_bar(request_id, &bar);
                drained += 1;
            }
        }
        if drained > 0 {
            tracing::debug!(drained, "Wrote queued bars during shutdown");
        }

        if let Err(e) = self.sink.close() {
            tracing::error!(error = %e, "Failed to close output files");
        }

        let subs = self.subscriptions.stats();
        tracing::info!(
            bars_written = self.stats.bars_written,
            write_failures = self.stats.write_failures,
            streaming = subs.streaming,
            rejected = subs.rejected,
            "Shutdown complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::DateTime;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{GatewayError, WriteError};
    use crate::domain::subscription::{Symbol, SubscriptionStatus};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Subscribe(RequestId, String),
        Cancel(RequestId),
        Disconnect,
    }

    #[derive(Default, Clone)]
    struct FakeGateway {
        calls: Arc<Mutex<Vec<Call>>>,
        refuse: Vec<String>,
    }

    #[async_trait]
    impl MarketDataGateway for FakeGateway {
        async fn subscribe_bars(
            &self,
            request_id: RequestId,
            symbol: &Symbol,
        ) -> Result<(), GatewayError> {
            if self.refuse.iter().any(|s| s == symbol.as_str()) {
                return Err(GatewayError::NotConnected);
            }
            self.calls
                .lock()
                .push(Call::Subscribe(request_id, symbol.to_string()));
            Ok(())
        }

        async fn cancel_bars(&self, request_id: RequestId) -> Result<(), GatewayError> {
            self.calls.lock().push(Call::Cancel(request_id));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), GatewayError> {
            self.calls.lock().push(Call::Disconnect);
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct MemorySink {
        rows: Arc<Mutex<Vec<(String, Bar)>>>,
        closed: Arc<Mutex<bool>>,
        fail_for: Option<String>,
    }

    impl BarSink for MemorySink {
        fn append(&mut self, symbol: &Symbol, bar: &Bar) -> Result<(), WriteError> {
            if self.fail_for.as_deref() == Some(symbol.as_str()) {
                return Err(WriteError::Io {
                    op: "append",
                    path: symbol.csv_path(Path::new("out")),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.rows.lock().push((symbol.to_string(), bar.clone()));
            Ok(())
        }

        fn close(&mut self) -> Result<(), WriteError> {
            *self.closed.lock() = true;
            Ok(())
        }
    }

    fn set(raw: &[&str]) -> SubscriptionSet {
        let symbols: Vec<Symbol> = raw.iter().map(|s| Symbol::parse(s).unwrap()).collect();
        SubscriptionSet::new(&symbols)
    }

    fn bar_at(secs: i64) -> Bar {
        Bar::new(
            DateTime::from_timestamp(secs, 0).unwrap(),
            Decimal::new(10_000, 2),
            Decimal::new(10_050, 2),
            Decimal::new(9_990, 2),
            Decimal::new(10_020, 2),
            300,
        )
    }

    #[tokio::test]
    async fn subscribe_all_requests_every_symbol() {
        let gateway = FakeGateway::default();
        let calls = Arc::clone(&gateway.calls);
        let mut recorder = Recorder::new(gateway, MemorySink::default(), set(&["SPY", "QQQ"]));

        assert_eq!(recorder.subscribe_all(&CancellationToken::new()).await.unwrap(), 2);
        assert_eq!(
            *calls.lock(),
            vec![
                Call::Subscribe(1, "SPY".to_string()),
                Call::Subscribe(2, "QQQ".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn subscribe_all_tolerates_single_failure() {
        let gateway = FakeGateway {
            refuse: vec!["QQQ".to_string()],
            ..FakeGateway::default()
        };
        let mut recorder =
            Recorder::new(gateway, MemorySink::default(), set(&["SPY", "QQQ", "IWM"]));

        assert_eq!(recorder.subscribe_all(&CancellationToken::new()).await.unwrap(), 2);
        assert!(matches!(
            recorder.subscriptions().get(2).unwrap().status,
            SubscriptionStatus::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn subscribe_all_fails_when_nothing_sent() {
        let gateway = FakeGateway {
            refuse: vec!["SPY".to_string()],
            ..FakeGateway::default()
        };
        let mut recorder = Recorder::new(gateway, MemorySink::default(), set(&["SPY"]));

        let err = recorder.subscribe_all(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RecorderError::NoSubscriptions { failed: 1 }));
    }

    #[tokio::test]
    async fn subscribe_all_fails_without_symbols() {
        let mut recorder = Recorder::new(
            FakeGateway::default(),
            MemorySink::default(),
            SubscriptionSet::default(),
        );
        assert!(matches!(
            recorder.subscribe_all(&CancellationToken::new()).await,
            Err(RecorderError::NoSymbols)
        ));
    }

    #[tokio::test]
    async fn bars_are_written_in_arrival_order() {
        let sink = MemorySink::default();
        let rows = Arc::clone(&sink.rows);
        let mut recorder = Recorder::new(FakeGateway::default(), sink, set(&["AAPL"]));

        for secs in [1_000, 1_005, 1_010] {
            let event = GatewayEvent::Bar {
                request_id: 1,
                bar: bar_at(secs),
            };
            assert!(recorder.handle_event(event).await.is_none());
        }

        let rows = rows.lock();
        let times: Vec<i64> = rows.iter().map(|(_, b)| b.timestamp.timestamp()).collect();
        assert_eq!(times, vec![1_000, 1_005, 1_010]);
        assert_eq!(recorder.stats().bars_written, 3);
        assert_eq!(
            recorder.subscriptions().get(1).unwrap().status,
            SubscriptionStatus::Streaming
        );
    }

    #[tokio::test]
    async fn rejected_symbol_does_not_block_others() {
        let sink = MemorySink::default();
        let rows = Arc::clone(&sink.rows);
        let mut recorder = Recorder::new(FakeGateway::default(), sink, set(&["XXXX", "SPY"]));

        recorder
            .handle_event(GatewayEvent::SubscriptionRejected {
                request_id: 1,
                code: 200,
                message: "No security definition has been found".to_string(),
            })
            .await;
        recorder
            .handle_event(GatewayEvent::Bar {
                request_id: 1,
                bar: bar_at(1_000),
            })
            .await;
        recorder
            .handle_event(GatewayEvent::Bar {
                request_id: 2,
                bar: bar_at(1_000),
            })
            .await;

        let rows = rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "SPY");
        assert_eq!(recorder.stats().bars_ignored, 1);
    }

    #[tokio::test]
    async fn write_failure_is_counted_and_skipped() {
        let sink = MemorySink {
            fail_for: Some("SPY".to_string()),
            ..MemorySink::default()
        };
        let rows = Arc::clone(&sink.rows);
        let mut recorder = Recorder::new(FakeGateway::default(), sink, set(&["SPY", "QQQ"]));

        recorder
            .handle_event(GatewayEvent::Bar {
                request_id: 1,
                bar: bar_at(1_000),
            })
            .await;
        recorder
            .handle_event(GatewayEvent::Bar {
                request_id: 2,
                bar: bar_at(1_000),
            })
            .await;

        assert_eq!(recorder.stats().write_failures, 1);
        assert_eq!(recorder.stats().bars_written, 1);
        assert_eq!(rows.lock()[0].0, "QQQ");
    }

    #[tokio::test]
    async fn disconnect_event_ends_session() {
        let mut recorder =
            Recorder::new(FakeGateway::default(), MemorySink::default(), set(&["SPY"]));
        let reason = recorder
            .handle_event(GatewayEvent::Disconnected {
                reason: "connection reset".to_string(),
            })
            .await;
        assert_eq!(
            reason,
            Some(ShutdownReason::ConnectionLost("connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn interrupt_cancels_disconnects_and_closes() {
        let gateway = FakeGateway::default();
        let calls = Arc::clone(&gateway.calls);
        let sink = MemorySink::default();
        let closed = Arc::clone(&sink.closed);
        let rows = Arc::clone(&sink.rows);
        let mut recorder = Recorder::new(gateway, sink, set(&["SPY"]));

        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        tx.send(GatewayEvent::Bar {
            request_id: 1,
            bar: bar_at(1_000),
        })
        .await
        .unwrap();
        shutdown.cancel();

        let reason = recorder.run(&mut rx, &shutdown).await.unwrap();

        assert_eq!(reason, ShutdownReason::Interrupted);
        assert_eq!(recorder.state(), RecorderState::ShuttingDown);
        assert!(*closed.lock());
        assert_eq!(rows.lock().len(), 1, "queued bar is drained on shutdown");
        assert_eq!(*calls.lock(), vec![Call::Cancel(1), Call::Disconnect]);
    }

    #[tokio::test]
    async fn connection_loss_skips_cancel() {
        let gateway = FakeGateway::default();
        let calls = Arc::clone(&gateway.calls);
        let mut recorder = Recorder::new(gateway, MemorySink::default(), set(&["SPY"]));

        let (tx, mut rx) = mpsc::channel(16);
        tx.send(GatewayEvent::Disconnected {
            reason: "eof".to_string(),
        })
        .await
        .unwrap();

        let reason = recorder
            .run(&mut rx, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!reason.is_graceful());
        assert_eq!(
            *calls.lock(),
            vec![Call::Subscribe(1, "SPY".to_string()), Call::Disconnect]
        );
    }

    #[tokio::test]
    async fn interrupt_before_subscribing_sends_nothing() {
        let gateway = FakeGateway::default();
        let calls = Arc::clone(&gateway.calls);
        let mut recorder = Recorder::new(gateway, MemorySink::default(), set(&["SPY", "QQQ"]));

        let (_tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let reason = recorder.run(&mut rx, &shutdown).await.unwrap();

        assert_eq!(reason, ShutdownReason::Interrupted);
        assert!(
            !calls
                .lock()
                .iter()
                .any(|c| matches!(c, Call::Subscribe(..)))
        );
    }

    #[tokio::test]
    async fn delayed_data_warning_keeps_recording() {
        let sink = MemorySink::default();
        let rows = Arc::clone(&sink.rows);
        let mut recorder = Recorder::new(FakeGateway::default(), sink, set(&["SPY"]));

        let warning = GatewayEvent::Notice {
            code: 10_167,
            message: "Requested market data is not subscribed. Displaying delayed market data."
                .to_string(),
        };
        assert!(recorder.handle_event(warning).await.is_none());
        recorder
            .handle_event(GatewayEvent::Bar {
                request_id: 1,
                bar: bar_at(1_000),
            })
            .await;

        assert_eq!(rows.lock().len(), 1);
        assert_eq!(
            recorder.subscriptions().get(1).unwrap().status,
            SubscriptionStatus::Streaming
        );
    }
}
