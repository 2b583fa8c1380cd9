//! Bus wire protocol
//!
//! This module defines the servo bus frame grammar, the request encoders and
//! response decoder, and the stream framer that recovers frames from the raw
//! byte stream.

pub mod frame;
pub mod framer;

pub use self::frame::{
    checksum, decode_response, encode_ping, encode_read_request, encode_write_request,
    ResponseFrame, StatusFrame,
};
pub use self::framer::Framer;

// Constants
/// Frame header byte; two in a row open every frame
pub const HEADER_BYTE: u8 = 0xFF;

/// Broadcast device id used by presence probes
pub const BROADCAST_ID: u8 = 0xFE;

/// Ping instruction code
pub const INST_PING: u8 = 0x01;

/// Read-data instruction code
pub const INST_READ: u8 = 0x02;

/// Write-data instruction code
pub const INST_WRITE: u8 = 0x03;

/// Control-table address of the model-identifier register
pub const MODEL_NUMBER_ADDR: u8 = 0x00;

/// Minimum structurally valid frame length (a probe acknowledgement)
pub const MIN_FRAME_LEN: usize = 6;

/// Maximum valid frame length on this bus
pub const MAX_FRAME_LEN: usize = 16;
