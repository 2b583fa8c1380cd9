//! Bus-side state and plumbing
//!
//! The device registry with its model templates, and the serial transport
//! pump feeding the engine.

pub mod registry;
pub mod table;
pub mod transport;

pub use self::registry::{Motor, MotorRegistry, PollTicket, ProbeOutcome, Register};
pub use self::transport::{open_serial, spawn_reader, LinkEvent};
