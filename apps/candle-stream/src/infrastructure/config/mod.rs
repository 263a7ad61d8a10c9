//! Configuration Module
//!
//! Configuration loading for the recorder.

mod settings;

pub use settings::{
    BarSettings, ConfigError, DEFAULT_EVENT_CAPACITY, DEFAULT_OUTPUT_DIR, GatewaySettings,
    RecorderConfig, WhatToShow,
};
