use crate::core::{MotorId, RegisterWidth};

use super::{BROADCAST_ID, HEADER_BYTE, INST_PING, INST_READ, INST_WRITE, MIN_FRAME_LEN};

/// Computes the frame checksum: the one's complement of the byte sum,
/// masked to 8 bits.
///
/// The sum covers everything between the two-byte header and the trailing
/// checksum byte, i.e. `id + len + payload`.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    !sum
}

/// Encodes a read request for `width` bytes at `address` of device `id`.
///
/// Layout: `FF FF <id> 04 02 <address> <width> <checksum>`.
pub fn encode_read_request(id: MotorId, address: u8, width: RegisterWidth) -> [u8; 8] {
    let mut frame = [
        HEADER_BYTE,
        HEADER_BYTE,
        id.0,
        0x04,
        INST_READ,
        address,
        width.len(),
        0,
    ];
    frame[7] = checksum(&frame[2..7]);
    frame
}

/// Encodes the broadcast presence probe: `FF FF FE 02 01 FE`.
pub fn encode_ping() -> [u8; 6] {
    let mut frame = [HEADER_BYTE, HEADER_BYTE, BROADCAST_ID, 0x02, INST_PING, 0];
    frame[5] = checksum(&frame[2..5]);
    frame
}

/// Encodes a fire-and-forget write of `value` to `address` of device `id`.
///
/// The value travels little-endian in `width` bytes; no response is expected.
pub fn encode_write_request(id: MotorId, address: u8, width: RegisterWidth, value: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(9);
    frame.extend_from_slice(&[
        HEADER_BYTE,
        HEADER_BYTE,
        id.0,
        3 + width.len(),
        INST_WRITE,
        address,
    ]);
    match width {
        RegisterWidth::Byte => frame.push(value as u8),
        RegisterWidth::Word => frame.extend_from_slice(&value.to_le_bytes()),
    }
    let sum = checksum(&frame[2..]);
    frame.push(sum);
    frame
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// Zero-payload acknowledgement of a broadcast probe, identified by its
    /// total length of six bytes
    ProbeAck {
        /// Responding device id, unvalidated
        id: u8,
    },
    /// A data response to a read request
    Status(StatusFrame),
}

/// Contents of a data response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    /// Responding device id
    pub id: u8,
    /// Device error flags byte
    pub error: u8,
    /// Data width declared by the length field (`len - 2`)
    pub width: u8,
    /// Register value, little-endian assembled; zero when the width is
    /// unsupported
    pub value: u16,
    /// Whether the recomputed checksum matched the trailing byte; widths
    /// outside 1..=2 are reported as invalid so the engine clears and
    /// reschedules
    pub checksum_ok: bool,
}

/// Decodes one complete frame as sliced by the [`Framer`](super::Framer).
///
/// Six-byte frames are probe acknowledgements and carry only an id; longer
/// frames are data responses. Frames shorter than six bytes are structurally
/// meaningless and yield `None`.
pub fn decode_response(frame: &[u8]) -> Option<ResponseFrame> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }
    if frame.len() == MIN_FRAME_LEN {
        return Some(ResponseFrame::ProbeAck { id: frame[2] });
    }

    let id = frame[2];
    let len = frame[3];
    let error = frame[4];
    let width = len.saturating_sub(2);

    let (value, width_ok) = match width {
        1 => (frame[5] as u16, true),
        2 => (u16::from_le_bytes([frame[5], frame[6]]), true),
        _ => (0, false),
    };

    let received = frame[frame.len() - 1];
    let expected = checksum(&frame[2..frame.len() - 1]);
    let checksum_ok = width_ok && expected == received;

    Some(ResponseFrame::Status(StatusFrame {
        id,
        error,
        width,
        value,
        checksum_ok,
    }))
}
