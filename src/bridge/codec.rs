//! Line-delimited JSON codec for the host channel
//!
//! One JSON document per line: commands decoded off stdin, notifications
//! encoded onto stdout. Malformed command lines are logged and skipped so a
//! host bug cannot wedge the worker.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::bridge::message::{Command, Notice};
use crate::core::Error;

/// Codec for the worker's stdio link with the host
#[derive(Debug, Clone, Default)]
pub struct BridgeCodec;

impl BridgeCodec {
    pub fn new() -> Self {
        BridgeCodec
    }
}

impl Decoder for BridgeCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, Error> {
        while let Some(pos) = src.iter().position(|b| *b == b'\n') {
            let line = src.split_to(pos + 1);
            let mut line = &line[..line.len() - 1];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(command) => return Ok(Some(command)),
                Err(e) => {
                    warn!(error = %e, "ignoring malformed command line");
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<Notice> for BridgeCodec {
    type Error = Error;

    fn encode(&mut self, item: Notice, dst: &mut BytesMut) -> Result<(), Error> {
        let payload = serde_json::to_vec(&item)
            .map_err(|e| Error::bridge(format!("failed to encode notification: {}", e)))?;
        dst.reserve(payload.len() + 1);
        dst.extend_from_slice(&payload);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
