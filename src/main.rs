//! Servo bus worker binary
//!
//! Speaks JSON lines with its host over stdio and the servo wire protocol
//! over a serial port. Logging goes to stderr so stdout stays a clean
//! notification stream.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use dxl_bus::bridge::{BridgeCodec, Command, Notice};
use dxl_bus::bus::{open_serial, spawn_reader};
use dxl_bus::core::EngineConfig;
use dxl_bus::engine::Engine;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(version = dxl_bus::VERSION, "servo bus worker starting");

    let (command_tx, mut command_rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = FramedRead::new(tokio::io::stdin(), BridgeCodec::new());
        while let Some(next) = lines.next().await {
            match next {
                Ok(command) => {
                    if command_tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "command stream failed");
                    break;
                }
            }
        }
        // The sender drops here; downstream sees the host hang up.
    });

    let (notice_tx, mut notice_rx) = mpsc::channel::<Notice>(64);
    let writer_task = tokio::spawn(async move {
        let mut lines = FramedWrite::new(tokio::io::stdout(), BridgeCodec::new());
        while let Some(notice) = notice_rx.recv().await {
            if let Err(e) = lines.send(notice).await {
                error!(error = %e, "notification stream failed");
                break;
            }
        }
    });

    // Nothing touches hardware until the host says which port to open
    let (port_name, baud_rate) = loop {
        match command_rx.recv().await {
            Some(Command::Init {
                port_name,
                baud_rate,
            }) => break (port_name, baud_rate),
            Some(Command::Shutdown) | None => {
                info!("shutdown before init");
                let _ = notice_tx.send(Notice::Terminated).await;
                drop(notice_tx);
                let _ = writer_task.await;
                return;
            }
            Some(other) => debug!(?other, "ignoring command before init"),
        }
    };

    info!(port = %port_name, baud = baud_rate, "opening serial port");
    let run_result = match open_serial(&port_name, baud_rate) {
        Ok(port) => {
            let (read_half, write_half) = tokio::io::split(port);
            let (data_tx, data_rx) = mpsc::channel(32);
            spawn_reader(read_half, data_tx);

            let _ = notice_tx.send(Notice::Opened).await;

            let mut engine = Engine::new(
                EngineConfig::default(),
                write_half,
                data_rx,
                command_rx,
                notice_tx.clone(),
            );
            engine.run().await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = run_result {
        error!(error = %e, "bus engine failed");
    }

    let _ = notice_tx.send(Notice::Terminated).await;
    drop(notice_tx);
    let _ = writer_task.await;
    info!("servo bus worker stopped");
}
