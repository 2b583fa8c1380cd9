use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use dxl_bus::bridge::{Command, Notice};
use dxl_bus::bus::spawn_reader;
use dxl_bus::core::{EngineConfig, MotorId};
use dxl_bus::engine::Engine;
use dxl_bus::protocol::{checksum, Framer};

const DEVICE_IDS: [u8; 2] = [1, 2];

#[tokio::main]
async fn main() {
    let (host_side, device_side) = tokio::io::duplex(4096);

    // Two simulated servos answer on the far side of the pipe
    tokio::spawn(simulate_devices(device_side));

    let (read_half, write_half) = tokio::io::split(host_side);
    let (data_tx, data_rx) = mpsc::channel(32);
    spawn_reader(read_half, data_tx);

    let (command_tx, command_rx) = mpsc::channel(8);
    let (notice_tx, mut notice_rx) = mpsc::channel(64);

    let engine_task = tokio::spawn(async move {
        let mut engine = Engine::new(
            EngineConfig::default(),
            write_half,
            data_rx,
            command_rx,
            notice_tx,
        );
        engine.run().await
    });

    println!("Servo bus monitor against a simulated two-device bus:");
    println!("- device 1: MX-28 (PID gain table)");
    println!("- device 2: generic servo (baseline table)");
    println!("\nRunning for 6 seconds...\n");

    let printer = tokio::spawn(async move {
        let mut fast_updates = 0u64;
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                Notice::MotorEncountered { motor } => {
                    println!("encountered device {}", motor);
                }
                Notice::MotorAdded { motor, registers } => {
                    println!("identified device {} with {} registers", motor, registers.len());
                }
                Notice::MotorRemoved { motor } => {
                    println!("removed device {}", motor);
                }
                Notice::ValueUpdated { motor, name, value } => {
                    let fast = matches!(
                        name.as_str(),
                        "presentPosition" | "presentSpeed" | "presentLoad"
                    );
                    if fast {
                        // The fast registers change constantly; show a sample
                        fast_updates += 1;
                        if fast_updates % 100 != 0 {
                            continue;
                        }
                    }
                    println!("device {} {} = {}", motor, name, value);
                }
                Notice::FrequencyUpdated {
                    motor,
                    name,
                    frequency,
                } => {
                    println!("device {} {} now polls every {}ms", motor, name, frequency);
                }
                Notice::StatUpdate { requests, hits } => {
                    println!("stats: {} requests, {} hits", requests, hits);
                }
                other => println!("{:?}", other),
            }
        }
    });

    sleep(Duration::from_secs(3)).await;

    println!("\nSlowing presentVoltage polling on device 1...");
    command_tx
        .send(Command::UpdateReadFrequency {
            motor_id: MotorId(1),
            address: 0x2A,
            frequency: 2000,
        })
        .await
        .unwrap();

    println!("Writing goalPosition 512 to device 1...\n");
    command_tx
        .send(Command::WriteRegister {
            motor_id: MotorId(1),
            address: 0x1E,
            num_bytes: 2,
            value: 512,
        })
        .await
        .unwrap();

    sleep(Duration::from_secs(3)).await;

    command_tx.send(Command::Shutdown).await.unwrap();
    engine_task.await.unwrap().unwrap();
    printer.await.unwrap();

    println!("\nDone");
}

/// Answers probes, reads and writes for the simulated devices
async fn simulate_devices(mut link: DuplexStream) {
    let mut table: HashMap<(u8, u8), u16> = HashMap::new();
    table.insert((1, 0x00), 0x001D);
    table.insert((2, 0x00), 0x000C);

    let mut framer = Framer::new();
    let mut buf = [0u8; 256];
    let mut tick = 0u16;

    loop {
        let n = match link.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        framer.push(&buf[..n]);

        while let Some(frame) = framer.next_frame() {
            // A short wire delay keeps the poll rate realistic
            sleep(Duration::from_millis(2)).await;

            match frame[4] {
                // Broadcast ping: every device acknowledges
                0x01 => {
                    for id in DEVICE_IDS {
                        let ack = [0xFF, 0xFF, id, 0x02, 0x00, checksum(&[id, 0x02, 0x00])];
                        if link.write_all(&ack).await.is_err() {
                            return;
                        }
                    }
                }
                // Read: answer with the stored or synthesized value
                0x02 => {
                    let (id, address, width) = (frame[2], frame[5], frame[6]);
                    tick = tick.wrapping_add(1);
                    let value = match address {
                        0x24 => 512 + (tick % 64),
                        0x2A => 120,
                        0x2B => 35 + (tick % 2),
                        _ => table.get(&(id, address)).copied().unwrap_or(address as u16),
                    };
                    let mut resp = vec![0xFF, 0xFF, id, width + 2, 0x00];
                    if width == 1 {
                        resp.push(value as u8);
                    } else {
                        resp.extend_from_slice(&value.to_le_bytes());
                    }
                    let sum = checksum(&resp[2..]);
                    resp.push(sum);
                    if link.write_all(&resp).await.is_err() {
                        return;
                    }
                }
                // Write: store the value, no response on the wire
                0x03 => {
                    let (id, address) = (frame[2], frame[5]);
                    let value = if frame[3] == 4 {
                        frame[6] as u16
                    } else {
                        u16::from_le_bytes([frame[6], frame[7]])
                    };
                    table.insert((id, address), value);
                    println!("  [device {}] register {:#04x} written: {}", id, address, value);
                }
                _ => {}
            }
        }
    }
}
