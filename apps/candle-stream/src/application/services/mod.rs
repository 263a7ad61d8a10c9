//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Recorder`: Owns the subscription set, drives the event loop, and
//!   performs the shutdown sequence.

mod recorder;

pub use recorder::{Recorder, RecorderError, RecorderState, RecorderStats, ShutdownReason};
