//! IB Gateway Client
//!
//! [`IbkrGateway`] owns one `ibapi::Client` connection and starts a
//! [`BarStream`] thread per subscribed symbol. Every worker pushes into the
//! same bounded channel the recorder drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use ibapi::Client;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::stream::BarStream;
use crate::application::ports::{GatewayError, GatewayEvent, MarketDataGateway};
use crate::domain::subscription::{RequestId, Symbol};
use crate::infrastructure::config::{BarSettings, GatewaySettings};

/// Longest wait for stream threads to stop on disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

struct StreamHandle {
    stop: CancellationToken,
    thread: JoinHandle<()>,
}

/// Gateway port implementation backed by `ibapi`.
pub struct IbkrGateway {
    client: Arc<Client>,
    bars: BarSettings,
    events: mpsc::Sender<GatewayEvent>,
    closing: CancellationToken,
    streams: Mutex<HashMap<RequestId, StreamHandle>>,
}

impl IbkrGateway {
    /// Connect to TWS or IB Gateway.
    ///
    /// The blocking `ibapi` connect runs on its own thread so it can be
    /// abandoned after `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionFailed`] if the gateway refuses the
    /// session or does not answer in time.
    pub async fn connect(
        settings: &GatewaySettings,
        bars: BarSettings,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Result<Self, GatewayError> {
        let addr = settings.addr();
        let client_id = settings.client_id;
        let failed = |reason: String| GatewayError::ConnectionFailed {
            addr: addr.clone(),
            reason,
        };

        tracing::info!(addr = %addr, client_id, "Connecting to gateway");

        let (tx, rx) = oneshot::channel();
        let target = addr.clone();
        thread::Builder::new()
            .name("ibkr-connect".to_string())
            .spawn(move || {
                let _ = tx.send(Client::connect(&target, client_id));
            })?;

        let client = match tokio::time::timeout(settings.connect_timeout, rx).await {
            Ok(Ok(Ok(client))) => client,
            Ok(Ok(Err(e))) => return Err(failed(e.to_string())),
            Ok(Err(_)) => return Err(failed("connect thread exited".to_string())),
            Err(_) => {
                return Err(failed(format!(
                    "no answer within {:?}",
                    settings.connect_timeout
                )));
            }
        };

        tracing::info!(
            addr = %addr,
            server_version = client.server_version(),
            "Connected to gateway"
        );

        Ok(Self {
            client: Arc::new(client),
            bars,
            events,
            closing: CancellationToken::new(),
            streams: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl MarketDataGateway for IbkrGateway {
    async fn subscribe_bars(
        &self,
        request_id: RequestId,
        symbol: &Symbol,
    ) -> Result<(), GatewayError> {
        if self.closing.is_cancelled() {
            return Err(GatewayError::NotConnected);
        }

        let stop = self.closing.child_token();
        let stream = BarStream {
            request_id,
            symbol: symbol.clone(),
            settings: self.bars.clone(),
            events: self.events.clone(),
            stop: stop.clone(),
        };
        let client = Arc::clone(&self.client);
        let (started_tx, started_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name(format!("bars-{symbol}"))
            .spawn(move || stream.run(&client, started_tx))?;

        if let Some(previous) = self
            .streams
            .lock()
            .insert(request_id, StreamHandle { stop, thread })
        {
            previous.stop.cancel();
        }

        let result = started_rx
            .await
            .unwrap_or(Err(GatewayError::NotConnected));
        if result.is_err() {
            self.streams.lock().remove(&request_id);
        }
        result
    }

    async fn cancel_bars(&self, request_id: RequestId) -> Result<(), GatewayError> {
        if let Some(stream) = self.streams.lock().get(&request_id) {
            stream.stop.cancel();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        self.closing.cancel();
        let threads: Vec<JoinHandle<()>> = self
            .streams
            .lock()
            .drain()
            .map(|(_, stream)| stream.thread)
            .collect();
        let count = threads.len();

        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                if thread.join().is_err() {
                    tracing::warn!("Bar stream thread panicked");
                }
            }
        });

        match tokio::time::timeout(DISCONNECT_GRACE, joined).await {
            Ok(_) => {
                tracing::info!(streams = count, "Disconnected from gateway");
                Ok(())
            }
            Err(_) => Err(GatewayError::Shutdown(format!(
                "{count} bar streams still running after {DISCONNECT_GRACE:?}"
            ))),
        }
    }
}
