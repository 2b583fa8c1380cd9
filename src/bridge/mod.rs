//! Host-process boundary
//!
//! The worker talks to its host over stdio: commands arrive as JSON lines on
//! stdin, notifications leave as JSON lines on stdout. This module defines the
//! typed messages and the codec that frames them.

pub mod codec;
pub mod message;

pub use self::codec::BridgeCodec;
pub use self::message::{Command, Notice};
