//! Bus engine
//!
//! One task owns the whole bus: the device registry, the single in-flight
//! read request, and every timer. Inbound bytes, host commands and timer
//! ticks are multiplexed through one `select!` loop, so no state is shared
//! and nothing needs locking.

pub mod scheduler;

pub use self::scheduler::{OutstandingPoll, PollScheduler};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::bridge::{Command, Notice};
use crate::bus::{LinkEvent, MotorRegistry, ProbeOutcome};
use crate::core::{BusStats, EngineConfig, MotorId, RegisterWidth, Result};
use crate::protocol::{
    decode_response, encode_ping, encode_write_request, Framer, ResponseFrame, StatusFrame,
    MODEL_NUMBER_ADDR,
};

/// Drives one serial bus: discovery, register polling and host commands.
///
/// `W` is the write half of the serial link; inbound bytes arrive through the
/// channel fed by [`spawn_reader`](crate::bus::spawn_reader).
pub struct Engine<W> {
    /// Timing configuration
    config: EngineConfig,
    /// Every device seen on the bus
    registry: MotorRegistry,
    /// The single in-flight read request
    scheduler: PollScheduler,
    /// Reassembles frames from the raw byte stream
    framer: Framer,
    /// Request and hit counters since startup
    stats: BusStats,
    /// Write half of the serial link
    writer: W,
    /// Bytes read off the link by the reader task
    data_rx: mpsc::Receiver<LinkEvent>,
    /// Commands forwarded from the host
    command_rx: mpsc::Receiver<Command>,
    /// Notifications back to the host
    notice_tx: mpsc::Sender<Notice>,
}

impl<W: AsyncWrite + Unpin> Engine<W> {
    /// Creates an engine over an open link
    pub fn new(
        config: EngineConfig,
        writer: W,
        data_rx: mpsc::Receiver<LinkEvent>,
        command_rx: mpsc::Receiver<Command>,
        notice_tx: mpsc::Sender<Notice>,
    ) -> Self {
        let scheduler = PollScheduler::new(config.poll_timeout);
        Engine {
            config,
            registry: MotorRegistry::new(),
            scheduler,
            framer: Framer::new(),
            stats: BusStats::default(),
            writer,
            data_rx,
            command_rx,
            notice_tx,
        }
    }

    /// Runs the bus loop until shutdown or link loss.
    ///
    /// Each timer first fires one full interval after startup. The poll
    /// timeout arm is only live while a request is outstanding.
    pub async fn run(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut probe_timer =
            interval_at(start + self.config.probe_interval, self.config.probe_interval);
        let mut reap_timer =
            interval_at(start + self.config.reap_interval, self.config.reap_interval);
        let mut stats_timer =
            interval_at(start + self.config.stats_interval, self.config.stats_interval);

        info!("bus engine running");

        loop {
            let poll_deadline = self.scheduler.timeout_deadline();

            tokio::select! {
                // Bytes from the reader task
                event = self.data_rx.recv() => match event {
                    Some(LinkEvent::Data(data)) => self.on_data(data).await?,
                    Some(LinkEvent::Closed) | None => {
                        warn!("serial link closed");
                        break;
                    }
                },

                // Host commands
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command).await? {
                            break;
                        }
                    }
                    None => {
                        info!("host channel closed, shutting down");
                        break;
                    }
                },

                // The outstanding read request's timeout
                _ = sleep_until(poll_deadline.unwrap_or_else(Instant::now)),
                        if poll_deadline.is_some() => {
                    self.on_poll_timeout().await?;
                }

                // Periodic broadcast presence probe
                _ = probe_timer.tick() => self.probe().await?,

                // Liveness sweep over identified devices
                _ = reap_timer.tick() => self.reap().await,

                // Statistics notification
                _ = stats_timer.tick() => self.report_stats().await,
            }
        }

        info!(
            motors = self.registry.motor_count(),
            requests = self.stats.requests,
            hits = self.stats.hits,
            "bus engine stopped"
        );
        Ok(())
    }

    /// Sends the next read request if none is outstanding.
    ///
    /// Every resolution path calls back into this, so as long as any register
    /// exists exactly one request is always on the wire.
    async fn pump(&mut self, now: Instant) -> Result<()> {
        if self.scheduler.in_flight() {
            return Ok(());
        }
        let ticket = match self.registry.take_due(now) {
            Some(ticket) => ticket,
            None => return Ok(()),
        };
        self.writer.write_all(&ticket.frame).await?;
        self.stats.requests += 1;
        self.scheduler.arm(ticket.motor, ticket.address, ticket.name, now);
        debug!(motor = %ticket.motor, register = ticket.name, "read request sent");
        Ok(())
    }

    /// Feeds received bytes through the framer and dispatches each frame
    async fn on_data(&mut self, data: Bytes) -> Result<()> {
        self.framer.push(&data);
        while let Some(frame) = self.framer.next_frame() {
            match decode_response(&frame) {
                Some(ResponseFrame::ProbeAck { id }) => self.on_probe_ack(id).await?,
                Some(ResponseFrame::Status(status)) => self.on_status(status).await?,
                None => debug!(len = frame.len(), "discarding undecodable frame"),
            }
        }
        Ok(())
    }

    /// Handles a probe acknowledgement: refresh a known device or create a
    /// new one and tell the host
    async fn on_probe_ack(&mut self, id: u8) -> Result<()> {
        let id = MotorId(id);
        if !id.is_addressable() {
            debug!(%id, "probe ack outside addressable range");
            return Ok(());
        }
        let now = Instant::now();
        match self.registry.observe_probe(id, now) {
            ProbeOutcome::Refreshed => {}
            ProbeOutcome::Discovered => {
                info!(motor = %id, "new device on bus");
                self.notify(Notice::MotorEncountered { motor: id }).await;
                self.pump(now).await?;
            }
        }
        Ok(())
    }

    /// Handles a data response.
    ///
    /// A corrupt frame frees the in-flight slot without unstamping the
    /// register. A valid frame only resolves the slot when it matches the
    /// outstanding request; anything else is logged and dropped, and the
    /// timeout path cleans up.
    async fn on_status(&mut self, status: StatusFrame) -> Result<()> {
        let now = Instant::now();

        if !status.checksum_ok {
            warn!(motor = status.id, "dropping corrupt data response");
            self.scheduler.resolve();
            return self.pump(now).await;
        }
        self.stats.hits += 1;
        if status.error != 0 {
            debug!(motor = status.id, flags = status.error, "device error flags set");
        }

        let id = MotorId(status.id);
        let motor = match self.registry.motor_mut(id) {
            Some(motor) => motor,
            None => {
                debug!(motor = %id, "data response from unknown device");
                return Ok(());
            }
        };
        motor.last_contact = now;

        let poll = match self.scheduler.outstanding() {
            Some(poll) => *poll,
            None => {
                debug!(motor = %id, "unsolicited data response");
                return Ok(());
            }
        };
        if poll.motor != id {
            debug!(motor = %id, expected = %poll.motor, "response does not match outstanding poll");
            return Ok(());
        }
        self.scheduler.resolve();

        // The model register only ever triggers template installation; its
        // value is never surfaced as a change, even on a later re-poll.
        if poll.address == MODEL_NUMBER_ADDR {
            if let Some(registers) = self.registry.install_template(id, status.value) {
                info!(motor = %id, model = status.value, "device identified");
                self.notify(Notice::MotorAdded { motor: id, registers }).await;
            } else if let Some(reg) = self.registry.register_mut(id, MODEL_NUMBER_ADDR) {
                reg.value = Some(status.value);
            }
            return self.pump(now).await;
        }

        let (name, changed) = match self.registry.register_mut(id, poll.address) {
            Some(reg) => {
                let changed = reg.value != Some(status.value);
                reg.value = Some(status.value);
                (reg.name, changed)
            }
            None => {
                debug!(motor = %id, address = poll.address, "response for unknown register");
                return self.pump(now).await;
            }
        };
        if changed {
            debug!(motor = %id, register = name, value = status.value, "value changed");
            self.notify(Notice::ValueUpdated {
                motor: id,
                name: name.to_string(),
                value: status.value,
            })
            .await;
        }
        self.pump(now).await
    }

    /// Gives up on the outstanding request and retries the register at the
    /// head of the queue
    async fn on_poll_timeout(&mut self) -> Result<()> {
        let poll = match self.scheduler.resolve() {
            Some(poll) => poll,
            None => return Ok(()),
        };
        warn!(motor = %poll.motor, register = poll.name, "read request timed out");
        if let Some(reg) = self.registry.register_mut(poll.motor, poll.address) {
            reg.last_poll = None;
        }
        self.pump(Instant::now()).await
    }

    /// Dispatches one host command. Returns `false` when the engine should
    /// stop.
    async fn on_command(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Init { port_name, .. } => {
                warn!(port = %port_name, "already initialized, ignoring init");
            }
            Command::Shutdown => {
                info!("shutdown requested");
                return Ok(false);
            }
            Command::UpdateReadFrequency {
                motor_id,
                address,
                frequency,
            } => match self.registry.set_frequency(motor_id, address, frequency) {
                Some(name) => {
                    info!(motor = %motor_id, register = name, frequency, "poll frequency changed");
                    self.notify(Notice::FrequencyUpdated {
                        motor: motor_id,
                        name: name.to_string(),
                        frequency,
                    })
                    .await;
                }
                None => {
                    debug!(motor = %motor_id, address, "frequency update for unknown register");
                }
            },
            Command::WriteRegister {
                motor_id,
                address,
                num_bytes,
                value,
            } => {
                self.on_write(motor_id, address, num_bytes, value).await?;
            }
        }
        Ok(true)
    }

    /// Validates and sends a fire-and-forget register write
    async fn on_write(
        &mut self,
        motor_id: MotorId,
        address: u8,
        num_bytes: u8,
        value: u16,
    ) -> Result<()> {
        let width = match RegisterWidth::from_wire(num_bytes) {
            Some(width) => width,
            None => {
                warn!(motor = %motor_id, num_bytes, "write with unsupported width ignored");
                return Ok(());
            }
        };
        if !width.fits(value) {
            warn!(motor = %motor_id, value, "write value does not fit register width, ignored");
            return Ok(());
        }
        let frame = encode_write_request(motor_id, address, width, value);
        self.writer.write_all(&frame).await?;
        debug!(motor = %motor_id, address, value, "write request sent");
        // Read the new value back at the next opportunity
        self.registry.touch_for_refresh(motor_id, address);
        Ok(())
    }

    /// Broadcasts one presence probe
    async fn probe(&mut self) -> Result<()> {
        self.writer.write_all(&encode_ping()).await?;
        debug!("broadcast probe sent");
        Ok(())
    }

    /// Evicts identified devices that have gone silent
    async fn reap(&mut self) {
        let removed = self
            .registry
            .evict_stale(Instant::now(), self.config.stale_after);
        for id in removed {
            info!(motor = %id, "device went silent, removing");
            self.notify(Notice::MotorRemoved { motor: id }).await;
        }
    }

    /// Pushes the periodic request/hit counters to the host
    async fn report_stats(&mut self) {
        debug!(
            requests = self.stats.requests,
            hits = self.stats.hits,
            "bus statistics"
        );
        self.notify(Notice::StatUpdate {
            requests: self.stats.requests,
            hits: self.stats.hits,
        })
        .await;
    }

    /// Sends a notification; a vanished host must not take the bus loop down
    async fn notify(&mut self, notice: Notice) {
        if self.notice_tx.send(notice).await.is_err() {
            debug!("notification dropped, host channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Duration};

    use crate::bus::spawn_reader;
    use crate::protocol::checksum;

    struct Harness {
        /// Device side of the simulated bus
        bus: DuplexStream,
        commands: mpsc::Sender<Command>,
        notices: mpsc::Receiver<Notice>,
        engine: JoinHandle<Result<()>>,
    }

    async fn start_engine() -> Harness {
        let (host_side, device_side) = duplex(65536);
        let (read_half, write_half) = tokio::io::split(host_side);
        let (data_tx, data_rx) = mpsc::channel(16);
        spawn_reader(read_half, data_tx);

        let (command_tx, command_rx) = mpsc::channel(16);
        let (notice_tx, notice_rx) = mpsc::channel(64);

        let engine = tokio::spawn(async move {
            let mut engine = Engine::new(
                EngineConfig::default(),
                write_half,
                data_rx,
                command_rx,
                notice_tx,
            );
            engine.run().await
        });

        Harness {
            bus: device_side,
            commands: command_tx,
            notices: notice_rx,
            engine,
        }
    }

    async fn shutdown(h: Harness) {
        let _ = h.commands.send(Command::Shutdown).await;
        timeout(Duration::from_secs(30), h.engine)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked")
            .expect("engine returned an error");
    }

    async fn next_notice(notices: &mut mpsc::Receiver<Notice>) -> Notice {
        timeout(Duration::from_secs(30), notices.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("notice channel closed")
    }

    async fn read_wire(bus: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        timeout(Duration::from_secs(30), bus.read_exact(&mut buf))
            .await
            .expect("timed out waiting for bus bytes")
            .expect("bus closed");
        buf
    }

    /// Reads one read-request frame; returns (id, address, width)
    async fn next_read_request(bus: &mut DuplexStream) -> (u8, u8, u8) {
        let req = read_wire(bus, 8).await;
        assert_eq!(&req[..2], [0xFF, 0xFF], "bad header: {:02x?}", req);
        assert_eq!(req[4], 0x02, "not a read request: {:02x?}", req);
        (req[2], req[5], req[6])
    }

    fn probe_ack(id: u8) -> Vec<u8> {
        vec![0xFF, 0xFF, id, 0x02, 0x00, checksum(&[id, 0x02, 0x00])]
    }

    fn status_frame(id: u8, width: u8, value: u16) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xFF, id, width + 2, 0x00];
        match width {
            1 => frame.push(value as u8),
            _ => frame.extend_from_slice(&value.to_le_bytes()),
        }
        let sum = checksum(&frame[2..]);
        frame.push(sum);
        frame
    }

    async fn respond(bus: &mut DuplexStream, id: u8, width: u8, value: u16) {
        bus.write_all(&status_frame(id, width, value)).await.unwrap();
    }

    /// Drives discovery of device `id` as an MX-28 and serves one full pass
    /// over its template, answering each register with its own address as the
    /// value. Drains the resulting notifications. Leaves one re-poll request
    /// pending on the bus.
    async fn identify_mx28(h: &mut Harness, id: u8) {
        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(id)).await.unwrap();
        let (rid, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!((rid, address), (id, 0x00));
        respond(&mut h.bus, id, width, 0x001D).await;
        for _ in 0..30 {
            let (_, address, width) = next_read_request(&mut h.bus).await;
            respond(&mut h.bus, id, width, address as u16).await;
        }
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { .. }
        ));
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorAdded { .. }
        ));
        for _ in 0..30 {
            assert!(matches!(
                next_notice(&mut h.notices).await,
                Notice::ValueUpdated { .. }
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_identifies_device() {
        let mut h = start_engine().await;

        // The first broadcast probe fires one interval after startup
        let ping = read_wire(&mut h.bus, 6).await;
        assert_eq!(ping, encode_ping());

        h.bus.write_all(&probe_ack(5)).await.unwrap();
        assert_eq!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { motor: MotorId(5) }
        );

        // Discovery immediately polls the model register
        let (id, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!((id, address, width), (5, 0x00, 2));
        respond(&mut h.bus, 5, 2, 0x001D).await;

        match next_notice(&mut h.notices).await {
            Notice::MotorAdded { motor, registers } => {
                assert_eq!(motor, MotorId(5));
                assert_eq!(registers[0].name, "modelNumber");
                let names: Vec<&str> = registers.iter().map(|r| r.name.as_str()).collect();
                assert!(names.contains(&"pGain"));
                assert!(names.contains(&"goalAcceleration"));
                assert!(!names.contains(&"cwComplianceMargin"));
                let position = registers.iter().find(|r| r.name == "presentPosition").unwrap();
                assert_eq!(position.address, 0x24);
                assert_eq!(position.bytes, 2);
                assert_eq!(position.frequency, 16);
            }
            other => panic!("expected motorAdded, got {:?}", other),
        }

        // Polling proceeds through the fresh template in table order
        let (_, address, _) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x02);

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_updates_deduplicated() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(5)).await.unwrap();
        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x00);
        respond(&mut h.bus, 5, width, 0x001D).await;

        // One pass over the template, then six re-polls of the fastest
        // registers with unchanged values, then one changed value
        for _ in 0..30 {
            let (_, address, width) = next_read_request(&mut h.bus).await;
            respond(&mut h.bus, 5, width, address as u16).await;
        }
        for _ in 0..6 {
            let (_, address, width) = next_read_request(&mut h.bus).await;
            assert!(
                matches!(address, 0x24 | 0x26 | 0x28),
                "expected a fast-register re-poll, got {:#04x}",
                address
            );
            respond(&mut h.bus, 5, width, address as u16).await;
        }
        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert!(matches!(address, 0x24 | 0x26 | 0x28));
        respond(&mut h.bus, 5, width, 0x777).await;

        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { .. }
        ));
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorAdded { .. }
        ));

        // Every template register notified exactly once on its first value
        let mut seen = Vec::new();
        for _ in 0..30 {
            match next_notice(&mut h.notices).await {
                Notice::ValueUpdated { name, value, .. } => seen.push((name, value)),
                other => panic!("expected valueUpdated, got {:?}", other),
            }
        }
        assert_eq!(seen[0].0, "firmwareVersion");
        assert!(seen.iter().all(|(name, _)| name != "modelNumber"));
        let distinct: HashSet<&str> = seen.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(distinct.len(), 30, "a register notified twice: {:?}", seen);

        // The unchanged re-polls stayed silent; the change notifies once
        match next_notice(&mut h.notices).await {
            Notice::ValueUpdated { name, value, .. } => {
                assert_eq!(name, "presentPosition");
                assert_eq!(value, 0x777);
            }
            other => panic!("expected valueUpdated after change, got {:?}", other),
        }

        shutdown(h).await;
    }

    /// Asserts the bus stays silent for a moment, short of the poll timeout
    async fn assert_wire_quiet(bus: &mut DuplexStream) {
        let mut byte = [0u8; 1];
        let quiet = timeout(Duration::from_millis(10), bus.read(&mut byte)).await;
        assert!(
            quiet.is_err(),
            "bus traffic while a request was already outstanding"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_request_in_flight() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(5)).await.unwrap();

        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x00);
        assert_wire_quiet(&mut h.bus).await;
        respond(&mut h.bus, 5, width, 0x001D).await;

        // Thirty never-polled registers are now all eligible at once, yet the
        // wire carries exactly one request until each one resolves
        for _ in 0..5 {
            let (_, address, width) = next_read_request(&mut h.bus).await;
            assert_wire_quiet(&mut h.bus).await;
            respond(&mut h.bus, 5, width, address as u16).await;
        }

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_register_repoll_stays_silent() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(5)).await.unwrap();
        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x00);
        respond(&mut h.bus, 5, width, 0x001D).await;

        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { .. }
        ));
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorAdded { .. }
        ));

        // Retune the model register so it comes up for a re-poll right away
        let (_, pending_addr, pending_width) = next_read_request(&mut h.bus).await;
        h.commands
            .send(Command::UpdateReadFrequency {
                motor_id: MotorId(5),
                address: 0x00,
                frequency: 1,
            })
            .await
            .unwrap();
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::FrequencyUpdated { .. }
        ));

        respond(&mut h.bus, 5, pending_width, pending_addr as u16).await;
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::ValueUpdated { .. }
        ));

        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x00, "retuned model register polls next");
        // The device now reports a different model number than at discovery
        respond(&mut h.bus, 5, width, 0x000C).await;

        // No reinstall and no value notification for the model register; the
        // next notice comes from an ordinary register
        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x04);
        respond(&mut h.bus, 5, width, 0x77).await;
        match next_notice(&mut h.notices).await {
            Notice::ValueUpdated { name, value, .. } => {
                assert_eq!(name, "baudRate");
                assert_eq!(value, 0x77);
            }
            other => panic!("expected valueUpdated, got {:?}", other),
        }

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_response_repeats_request() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(9)).await.unwrap();

        let first = read_wire(&mut h.bus, 8).await;
        let mut bad = status_frame(9, 2, 0x001D);
        bad[5] ^= 0x55;
        h.bus.write_all(&bad).await.unwrap();

        // The corrupt answer frees the slot and the same request goes again
        let second = read_wire(&mut h.bus, 8).await;
        assert_eq!(first, second, "retry must repeat the identical request");
        respond(&mut h.bus, 9, 2, 0x001D).await;

        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { .. }
        ));
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorAdded { .. }
        ));

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_repeats_request() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(9)).await.unwrap();

        // Leave the model request unanswered until its timeout lapses
        let first = read_wire(&mut h.bus, 8).await;
        let second = read_wire(&mut h.bus, 8).await;
        assert_eq!(first, second, "retry must repeat the identical request");

        respond(&mut h.bus, 9, 2, 0x006B).await;
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { .. }
        ));
        match next_notice(&mut h.notices).await {
            Notice::MotorAdded { registers, .. } => {
                let names: Vec<&str> = registers.iter().map(|r| r.name.as_str()).collect();
                assert!(names.contains(&"driveMode"));
                assert!(names.contains(&"sensedCurrent"));
                assert!(names.contains(&"cwComplianceMargin"));
                assert!(!names.contains(&"pGain"));
            }
            other => panic!("expected motorAdded, got {:?}", other),
        }

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_responses_ignored() {
        let mut h = start_engine().await;

        // Valid but unsolicited traffic before any discovery is discarded
        h.bus.write_all(&status_frame(9, 2, 0x1234)).await.unwrap();

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(5)).await.unwrap();
        let (id, address, _) = next_read_request(&mut h.bus).await;
        assert_eq!((id, address), (5, 0x00));

        // An answer from a device we never asked leaves the poll armed
        h.bus.write_all(&status_frame(77, 2, 0x001D)).await.unwrap();
        respond(&mut h.bus, 5, 2, 0x001D).await;

        assert_eq!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { motor: MotorId(5) }
        );
        match next_notice(&mut h.notices).await {
            Notice::MotorAdded { motor, .. } => assert_eq!(motor, MotorId(5)),
            other => panic!("expected motorAdded, got {:?}", other),
        }
        // Device 77 never became a motor and produced no notifications
        assert!(h.notices.try_recv().is_err());

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_command_reaches_wire() {
        let mut h = start_engine().await;
        identify_mx28(&mut h, 5).await;

        // Consume the pending re-poll request before queueing writes
        let (_, pending_addr, pending_width) = next_read_request(&mut h.bus).await;

        // Invalid widths and oversized values are dropped before the wire
        h.commands
            .send(Command::WriteRegister {
                motor_id: MotorId(5),
                address: 0x1E,
                num_bytes: 3,
                value: 1,
            })
            .await
            .unwrap();
        h.commands
            .send(Command::WriteRegister {
                motor_id: MotorId(5),
                address: 0x19,
                num_bytes: 1,
                value: 0x100,
            })
            .await
            .unwrap();
        h.commands
            .send(Command::WriteRegister {
                motor_id: MotorId(5),
                address: 0x1E,
                num_bytes: 2,
                value: 512,
            })
            .await
            .unwrap();

        let frame = read_wire(&mut h.bus, 9).await;
        assert_eq!(
            frame,
            encode_write_request(MotorId(5), 0x1E, RegisterWidth::Word, 512)
        );

        // Resolve the pending poll; the written register reads back next
        respond(&mut h.bus, 5, pending_width, pending_addr as u16).await;
        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!((address, width), (0x1E, 2), "written register reads back first");
        respond(&mut h.bus, 5, 2, 512).await;
        match next_notice(&mut h.notices).await {
            Notice::ValueUpdated { name, value, .. } => {
                assert_eq!(name, "goalPosition");
                assert_eq!(value, 512);
            }
            other => panic!("expected valueUpdated, got {:?}", other),
        }

        // Fire-and-forget: unknown targets still go out
        h.commands
            .send(Command::WriteRegister {
                motor_id: MotorId(99),
                address: 0x19,
                num_bytes: 1,
                value: 1,
            })
            .await
            .unwrap();
        let frame = read_wire(&mut h.bus, 8).await;
        assert_eq!(
            frame,
            encode_write_request(MotorId(99), 0x19, RegisterWidth::Byte, 1)
        );

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_frequency_command() {
        let mut h = start_engine().await;
        identify_mx28(&mut h, 5).await;

        // Unknown register: silently ignored. Known register: notify and
        // make immediately eligible.
        h.commands
            .send(Command::UpdateReadFrequency {
                motor_id: MotorId(5),
                address: 0x77,
                frequency: 50,
            })
            .await
            .unwrap();
        h.commands
            .send(Command::UpdateReadFrequency {
                motor_id: MotorId(5),
                address: 0x2A,
                frequency: 50,
            })
            .await
            .unwrap();

        assert_eq!(
            next_notice(&mut h.notices).await,
            Notice::FrequencyUpdated {
                motor: MotorId(5),
                name: "presentVoltage".to_string(),
                frequency: 50,
            }
        );

        // Resolve the pending re-poll; the retuned register goes next
        let (_, pending_addr, pending_width) = next_read_request(&mut h.bus).await;
        respond(&mut h.bus, 5, pending_width, pending_addr as u16).await;
        let (_, address, _) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x2A, "retuned register polls first");

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_and_stats() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;
        h.bus.write_all(&probe_ack(5)).await.unwrap();
        let (_, _, width) = next_read_request(&mut h.bus).await;
        respond(&mut h.bus, 5, width, 0x001D).await;

        // First template poll answered corrupt: counts as a request, not a hit
        let (_, address, _) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x02);
        let mut bad = status_frame(5, 1, 0x01);
        bad[5] ^= 0x20;
        h.bus.write_all(&bad).await.unwrap();

        // Second poll answered cleanly, then the device goes dark
        let (_, address, width) = next_read_request(&mut h.bus).await;
        assert_eq!(address, 0x04);
        respond(&mut h.bus, 5, width, 0x04).await;

        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { .. }
        ));
        assert!(matches!(
            next_notice(&mut h.notices).await,
            Notice::MotorAdded { .. }
        ));
        match next_notice(&mut h.notices).await {
            Notice::ValueUpdated { name, value, .. } => {
                assert_eq!(name, "baudRate");
                assert_eq!(value, 0x04);
            }
            other => panic!("expected valueUpdated, got {:?}", other),
        }

        // Silence outlasts the staleness window: the identified device is
        // evicted on a later sweep
        assert_eq!(
            next_notice(&mut h.notices).await,
            Notice::MotorRemoved { motor: MotorId(5) }
        );

        // The periodic counters report only clean responses as hits
        match next_notice(&mut h.notices).await {
            Notice::StatUpdate { requests, hits } => {
                assert_eq!(hits, 2, "model and baudRate responses only");
                assert!(requests >= 4, "retries keep counting, got {}", requests);
            }
            other => panic!("expected statUpdate, got {:?}", other),
        }

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_and_split_delivery() {
        let mut h = start_engine().await;

        read_wire(&mut h.bus, 6).await;

        // Garbage, then an acknowledgement split across two writes
        h.bus.write_all(&[0x00, 0x12, 0xFF, 0x07]).await.unwrap();
        let ack = probe_ack(5);
        h.bus.write_all(&ack[..3]).await.unwrap();
        tokio::task::yield_now().await;
        h.bus.write_all(&ack[3..]).await.unwrap();

        assert_eq!(
            next_notice(&mut h.notices).await,
            Notice::MotorEncountered { motor: MotorId(5) }
        );
        let (id, address, _) = next_read_request(&mut h.bus).await;
        assert_eq!((id, address), (5, 0x00));

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_init_ignored() {
        let mut h = start_engine().await;
        h.commands
            .send(Command::Init {
                port_name: "/dev/ttyUSB0".to_string(),
                baud_rate: 1_000_000,
            })
            .await
            .unwrap();

        // The engine keeps running: the probe still fires
        let ping = read_wire(&mut h.bus, 6).await;
        assert_eq!(ping, encode_ping());

        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_command_stops_engine() {
        let h = start_engine().await;
        h.commands.send(Command::Shutdown).await.unwrap();
        timeout(Duration::from_secs(30), h.engine)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked")
            .expect("engine returned an error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_hangup_stops_engine() {
        let h = start_engine().await;
        drop(h.commands);
        timeout(Duration::from_secs(30), h.engine)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked")
            .expect("engine returned an error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_close_stops_engine() {
        let h = start_engine().await;
        drop(h.bus);
        timeout(Duration::from_secs(30), h.engine)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked")
            .expect("engine returned an error");
    }
}
