//! Recorder Configuration Settings
//!
//! Configuration types for the recorder, loaded from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::subscription::{Symbol, SymbolError, default_symbols, parse_symbols};

/// Data type aggregated into real-time bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhatToShow {
    /// Trade prices.
    #[default]
    Trades,
    /// Bid/ask midpoint.
    Midpoint,
    /// Bid prices.
    Bid,
    /// Ask prices.
    Ask,
}

impl WhatToShow {
    /// Get the gateway wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trades => "TRADES",
            Self::Midpoint => "MIDPOINT",
            Self::Bid => "BID",
            Self::Ask => "ASK",
        }
    }
}

impl FromStr for WhatToShow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRADES" => Ok(Self::Trades),
            "MIDPOINT" => Ok(Self::Midpoint),
            "BID" => Ok(Self::Bid),
            "ASK" => Ok(Self::Ask),
            other => Err(format!("expected TRADES, MIDPOINT, BID or ASK, got {other:?}")),
        }
    }
}

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Gateway host.
    pub host: String,
    /// Gateway API port.
    pub port: u16,
    /// API client id.
    pub client_id: i32,
    /// Timeout for the connect and API handshake.
    pub connect_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7496,
            client_id: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl GatewaySettings {
    /// `host:port` address string, with IPv6 literals bracketed.
    #[must_use]
    pub fn addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

/// Real-time bar request settings.
#[derive(Debug, Clone, Default)]
pub struct BarSettings {
    /// Data aggregated into bars.
    pub what_to_show: WhatToShow,
    /// Only regular trading hours.
    pub use_rth: bool,
}

/// Complete recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// Bar request settings.
    pub bars: BarSettings,
    /// Directory receiving `<SYMBOL>.csv` files.
    pub output_dir: PathBuf,
    /// Symbols to stream.
    pub tickers: Vec<Symbol>,
    /// Capacity of the gateway event channel.
    pub event_capacity: usize,
    /// Prometheus listener port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            bars: BarSettings::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            tickers: default_symbols(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            metrics_port: 0,
        }
    }
}

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "ibkr_candles";

/// Default gateway event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

impl RecorderConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a malformed value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GatewaySettings::default();

        let host = lookup("IB_HOST")
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.host);
        if host.is_empty() {
            return Err(ConfigError::EmptyValue("IB_HOST".to_string()));
        }

        let gateway = GatewaySettings {
            host,
            port: parse_env(&lookup, "IB_PORT", defaults.port)?,
            client_id: parse_env(&lookup, "IB_CLIENT_ID", defaults.client_id)?,
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "IB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
        };

        let bars = BarSettings {
            what_to_show: parse_env(&lookup, "IB_WHAT_TO_SHOW", WhatToShow::default())?,
            use_rth: parse_env_bool(&lookup, "IB_USE_RTH", false)?,
        };

        let output_dir = lookup("OUTPUT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR), PathBuf::from);

        let tickers = match lookup("TICKERS") {
            Some(raw) if !raw.trim().is_empty() => {
                parse_symbols(raw.split(',').filter(|s| !s.trim().is_empty()))
                    .map_err(|source| ConfigError::InvalidSymbol { source })?
            }
            _ => default_symbols(),
        };

        let event_capacity = parse_env(
            &lookup,
            "CANDLE_STREAM_EVENT_CAPACITY",
            DEFAULT_EVENT_CAPACITY,
        )?;
        if event_capacity == 0 {
            return Err(must_be_positive("CANDLE_STREAM_EVENT_CAPACITY"));
        }

        Ok(Self {
            gateway,
            bars,
            output_dir,
            tickers,
            event_capacity,
            metrics_port: parse_env(&lookup, "CANDLE_STREAM_METRICS_PORT", 0)?,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
    /// A symbol in `TICKERS` is invalid.
    #[error("invalid symbol in TICKERS: {source}")]
    InvalidSymbol {
        /// Underlying symbol error.
        #[source]
        source: SymbolError,
    },
}

fn parse_env<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.trim().to_string(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn parse_env_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

/// Parse a whole-second duration. Zero is rejected.
fn parse_env_duration_secs<F>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_env::<u64, F>(lookup, key, default.as_secs())? {
        0 => Err(must_be_positive(key)),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn must_be_positive(key: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: "0".to_string(),
        reason: "must be greater than zero".to_string(),
    }
}
