//! Gateway Connect Integration Tests
//!
//! Startup failures of the `ibapi`-backed gateway, without a live TWS.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use candle_stream::{BarSettings, GatewayError, GatewaySettings, IbkrGateway};

fn settings(port: u16) -> GatewaySettings {
    GatewaySettings {
        host: "127.0.0.1".to_string(),
        port,
        client_id: 17,
        connect_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn nothing_listening_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (tx, _rx) = mpsc::channel(16);
    let result = IbkrGateway::connect(&settings(port), BarSettings::default(), tx).await;

    match result {
        Err(GatewayError::ConnectionFailed { addr, .. }) => {
            assert_eq!(addr, format!("127.0.0.1:{port}"));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[tokio::test]
async fn silent_gateway_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _held = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(sock);
    });

    let mut settings = settings(port);
    settings.connect_timeout = Duration::from_millis(300);
    let started = Instant::now();

    let (tx, _rx) = mpsc::channel(16);
    let result = IbkrGateway::connect(&settings, BarSettings::default(), tx).await;

    assert!(matches!(result, Err(GatewayError::ConnectionFailed { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
}
