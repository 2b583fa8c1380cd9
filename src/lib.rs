//! Servo bus monitoring worker
//!
//! Watches a half-duplex multi-drop servo bus: devices are discovered with
//! periodic broadcast probes, every known register is polled on an
//! earliest-deadline-first schedule with a single request in flight, and
//! value changes are reported to a host process as JSON lines over stdio.

pub mod bridge;
pub mod bus;
pub mod core;
pub mod engine;
pub mod protocol;

// Re-export commonly used items
pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
