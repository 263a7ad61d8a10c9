//! Candle Stream Binary
//!
//! Records 5-second bars from TWS / IB Gateway into per-ticker CSV files.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin candle-stream
//! ```
//!
//! # Environment Variables
//!
//! - `IB_HOST`: Gateway host (default: 127.0.0.1)
//! - `IB_PORT`: Gateway port (default: 7496)
//! - `IB_CLIENT_ID`: API client id (default: 1)
//! - `OUTPUT_DIR`: CSV directory (default: ibkr_candles)
//! - `TICKERS`: Comma-separated symbols (default: built-in list)
//! - `IB_WHAT_TO_SHOW`: TRADES | MIDPOINT | BID | ASK (default: TRADES)
//! - `IB_USE_RTH`: Regular trading hours only (default: false)
//! - `CANDLE_STREAM_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: info)
//!
//! # Exit Codes
//!
//! - `0`: Stopped by Ctrl+C or SIGTERM
//! - `1`: Configuration or connection failure at startup
//! - `2`: Gateway connection lost while recording

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use anyhow::Context;
use candle_stream::infrastructure::telemetry;
use candle_stream::{
    CsvBarWriter, IbkrGateway, Recorder, RecorderConfig, ShutdownReason, SubscriptionSet,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Exit code for a connection lost mid-session.
const EXIT_CONNECTION_LOST: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting candle stream recorder");

    match run().await {
        Ok(ShutdownReason::Interrupted) => {
            tracing::info!("Recorder stopped");
            ExitCode::SUCCESS
        }
        Ok(ShutdownReason::ConnectionLost(reason)) => {
            tracing::error!(reason = %reason, "Recorder stopped after losing the gateway");
            ExitCode::from(EXIT_CONNECTION_LOST)
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Recorder failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ShutdownReason> {
    let config = RecorderConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.metrics_port));
        init_metrics(addr).context("failed to start metrics exporter")?;
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let (event_tx, mut event_rx) = mpsc::channel(config.event_capacity);
    let gateway = tokio::select! {
        result = IbkrGateway::connect(&config.gateway, config.bars.clone(), event_tx) => {
            result.context("failed to connect to gateway")?
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Shutdown requested while connecting");
            return Ok(ShutdownReason::Interrupted);
        }
    };

    let subscriptions = SubscriptionSet::new(&config.tickers);
    let sink = CsvBarWriter::new(&config.output_dir);
    let mut recorder = Recorder::new(gateway, sink, subscriptions);

    let reason = recorder.run(&mut event_rx, &shutdown_token).await?;
    Ok(reason)
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RecorderConfig) {
    tracing::info!(
        gateway = %config.gateway.addr(),
        client_id = config.gateway.client_id,
        output_dir = %config.output_dir.display(),
        tickers = config.tickers.len(),
        what_to_show = config.bars.what_to_show.as_str(),
        use_rth = config.bars.use_rth,
        "Configuration loaded"
    );
    tracing::debug!(
        connect_timeout_secs = config.gateway.connect_timeout.as_secs(),
        event_capacity = config.event_capacity,
        metrics_port = config.metrics_port,
        "Runtime settings"
    );
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
