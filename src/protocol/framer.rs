use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

use super::{HEADER_BYTE, MAX_FRAME_LEN, MIN_FRAME_LEN};

/// Recovers complete frames from the raw transport byte stream.
///
/// The framer owns the unconsumed tail of received bytes. Garbage ahead of a
/// frame header is dropped without inspection; an accumulation whose declared
/// length cannot belong to any valid frame is discarded wholesale so a
/// corrupted length byte can never wedge resynchronization.
#[derive(Debug, Default)]
pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    /// Creates an empty framer
    pub fn new() -> Self {
        Framer {
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Appends freshly received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to extract the next complete frame.
    ///
    /// Call repeatedly after each [`push`](Self::push) until it returns
    /// `None`; frames come out strictly in arrival order.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.discard_garbage();

        if self.buf.len() < MIN_FRAME_LEN {
            return None;
        }

        let declared = self.buf[3] as usize;
        let total = 3 + declared + 1;
        if total > MAX_FRAME_LEN {
            // A length this large cannot open a valid frame and leaves no
            // safe resync point; drop the whole accumulation.
            warn!(declared, pending = self.buf.len(), "clearing unframeable buffer");
            self.buf.clear();
            return None;
        }

        if self.buf.len() < total {
            return None;
        }

        Some(self.buf.split_to(total).freeze())
    }

    /// Number of buffered bytes not yet consumed by a frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drops bytes ahead of the first header-pair candidate.
    ///
    /// A lone `0xFF` as the final byte is kept; its partner may arrive with
    /// the next chunk.
    fn discard_garbage(&mut self) {
        let mut i = 0;
        while i < self.buf.len() {
            if self.buf[i] == HEADER_BYTE
                && (i + 1 == self.buf.len() || self.buf[i + 1] == HEADER_BYTE)
            {
                break;
            }
            i += 1;
        }
        if i == self.buf.len() {
            self.buf.clear();
        } else if i > 0 {
            self.buf.advance(i);
        }
    }
}
