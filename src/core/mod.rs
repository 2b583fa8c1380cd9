//! Core types for the servo bus worker
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{BusStats, EngineConfig, MotorId, RegisterSpec, RegisterWidth};

use std::time::Duration;

/// Highest addressable device id; 0xFE is reserved for broadcast
pub const MAX_MOTOR_ID: u8 = 253;

/// How long an outstanding read waits for its response
pub const POLL_TIMEOUT: Duration = Duration::from_millis(32);

/// Interval between broadcast presence probes
pub const PROBE_INTERVAL: Duration = Duration::from_millis(1000);

/// Interval between liveness sweeps
pub const REAP_INTERVAL: Duration = Duration::from_millis(1000);

/// Age of last contact beyond which an identified device is considered stale
pub const STALE_AFTER: Duration = Duration::from_millis(1000);

/// Interval between statistics notifications to the host
pub const STATS_INTERVAL: Duration = Duration::from_millis(5000);
