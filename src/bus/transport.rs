//! Serial transport plumbing
//!
//! Opens the bus port and pumps its raw bytes into the engine's event
//! channel. The pump owns no engine state; ordering and backpressure come
//! from the channel.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error};

use crate::core::Result;

/// Events surfaced by the transport pump
#[derive(Debug)]
pub enum LinkEvent {
    /// A chunk of raw bytes arrived
    Data(Bytes),
    /// End of stream or a read failure; the engine must shut down
    Closed,
}

/// Opens the serial port the bus hangs off
pub fn open_serial(port_name: &str, baud_rate: u32) -> Result<SerialStream> {
    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut stream = tokio_serial::new(port_name, baud_rate).open_native_async()?;
    #[cfg(unix)]
    stream.set_exclusive(false)?;
    Ok(stream)
}

/// Spawns the byte pump for the read half of the port.
///
/// Every chunk is forwarded as [`LinkEvent::Data`]; end-of-stream and read
/// errors become a final [`LinkEvent::Closed`].
pub fn spawn_reader<R>(mut reader: R, tx: mpsc::Sender<LinkEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(256);
        loop {
            buf.reserve(128);
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    debug!("transport reached end of stream");
                    let _ = tx.send(LinkEvent::Closed).await;
                    break;
                }
                Ok(_) => {
                    if tx.send(LinkEvent::Data(buf.split().freeze())).await.is_err() {
                        // Engine is gone; nothing left to feed
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "transport read failed");
                    let _ = tx.send(LinkEvent::Closed).await;
                    break;
                }
            }
        }
    })
}
