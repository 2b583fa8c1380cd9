use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bus identifier of a servo device (0–253; 0xFE is the broadcast id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MotorId(pub u8);

impl MotorId {
    /// Returns whether this is a valid addressable device id
    pub fn is_addressable(&self) -> bool {
        self.0 <= super::MAX_MOTOR_ID
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width of a control-table register in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    /// Single-byte register
    Byte,
    /// Two-byte register, little-endian on the wire
    Word,
}

impl RegisterWidth {
    /// Returns the width in bytes
    pub fn len(&self) -> u8 {
        match self {
            RegisterWidth::Byte => 1,
            RegisterWidth::Word => 2,
        }
    }

    /// Parses a wire-level byte count into a width
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(RegisterWidth::Byte),
            2 => Some(RegisterWidth::Word),
            _ => None,
        }
    }

    /// Returns whether `value` fits in this width
    pub fn fits(&self, value: u16) -> bool {
        match self {
            RegisterWidth::Byte => value <= u8::MAX as u16,
            RegisterWidth::Word => true,
        }
    }
}

/// Host-facing description of one register, as attached to a
/// device-discovered notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Symbolic register name
    pub name: String,
    /// Byte offset into the device's control table
    pub address: u8,
    /// Width in bytes (1 or 2)
    pub bytes: u8,
    /// Poll frequency in milliseconds
    pub frequency: u64,
}

/// Engine timing configuration
///
/// Port name and baud rate are not part of this struct; they arrive with the
/// init command.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait for a response to an outstanding read
    pub poll_timeout: Duration,
    /// Interval between broadcast presence probes
    pub probe_interval: Duration,
    /// Interval between liveness sweeps
    pub reap_interval: Duration,
    /// Age of last contact beyond which an identified device is evicted
    pub stale_after: Duration,
    /// Interval between statistics notifications
    pub stats_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_timeout: super::POLL_TIMEOUT,
            probe_interval: super::PROBE_INTERVAL,
            reap_interval: super::REAP_INTERVAL,
            stale_after: super::STALE_AFTER,
            stats_interval: super::STATS_INTERVAL,
        }
    }
}

/// Monotonic bus traffic counters, never reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Read requests sent (pings and writes are not counted)
    pub requests: u64,
    /// Checksum-valid data responses received (probe acks are not counted)
    pub hits: u64,
}
