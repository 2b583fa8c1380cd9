use std::time::Duration;

use tokio::time::Instant;

use crate::core::{MotorId, RegisterSpec, RegisterWidth};
use crate::protocol::{encode_read_request, MODEL_NUMBER_ADDR};

use super::table;

/// One pollable entry in a device's control table
#[derive(Debug, Clone)]
pub struct Register {
    /// Symbolic name, fixed by the template
    pub name: &'static str,
    /// Byte offset into the device's control table
    pub address: u8,
    /// Width in bytes
    pub width: RegisterWidth,
    /// Poll frequency in milliseconds
    pub frequency_ms: u64,
    /// Last observed value; `None` until the first valid response
    pub value: Option<u16>,
    /// When this register was last polled; `None` makes it maximally overdue
    pub last_poll: Option<Instant>,
    /// Precomputed read-request frame
    pub read_frame: [u8; 8],
}

impl Register {
    /// Creates a register for `motor`, never polled, with its read request
    /// frame baked in
    pub fn new(
        motor: MotorId,
        name: &'static str,
        address: u8,
        width: RegisterWidth,
        frequency_ms: u64,
    ) -> Self {
        Register {
            name,
            address,
            width,
            frequency_ms,
            value: None,
            last_poll: None,
            read_frame: encode_read_request(motor, address, width),
        }
    }

    /// Scheduling deadline: last poll plus frequency.
    ///
    /// `None` (never polled) sorts before every concrete deadline, which is
    /// exactly the eligibility order the scheduler wants.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_poll
            .map(|t| t + Duration::from_millis(self.frequency_ms))
    }

    /// Host-facing description of this register
    pub fn spec(&self) -> RegisterSpec {
        RegisterSpec {
            name: self.name.to_string(),
            address: self.address,
            bytes: self.width.len(),
            frequency: self.frequency_ms,
        }
    }
}

/// A servo device on the bus
#[derive(Debug)]
pub struct Motor {
    /// Bus identifier
    pub id: MotorId,
    /// Model number; `None` until the model register has answered
    pub model: Option<u16>,
    /// Timestamp of the last valid frame from this device
    pub last_contact: Instant,
    /// Control-table registers, insertion-ordered
    pub registers: Vec<Register>,
}

impl Motor {
    fn new(id: MotorId, now: Instant) -> Self {
        Motor {
            id,
            model: None,
            last_contact: now,
            registers: vec![table::seed_register(id)],
        }
    }

    /// Whether the model register has produced a value yet
    pub fn is_identified(&self) -> bool {
        self.model.is_some()
    }

    /// Looks up a register by control-table address
    pub fn register(&self, address: u8) -> Option<&Register> {
        self.registers.iter().find(|r| r.address == address)
    }

    /// Looks up a register by control-table address, mutably
    pub fn register_mut(&mut self, address: u8) -> Option<&mut Register> {
        self.registers.iter_mut().find(|r| r.address == address)
    }

    /// Host-facing description of the full register table
    pub fn specs(&self) -> Vec<RegisterSpec> {
        self.registers.iter().map(Register::spec).collect()
    }
}

/// Outcome of a probe acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Known device; last contact refreshed
    Refreshed,
    /// New device created and seeded with its model register
    Discovered,
}

/// Everything the scheduler needs to send one read poll and later correlate
/// its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket {
    /// Owning device
    pub motor: MotorId,
    /// Polled control-table address
    pub address: u8,
    /// Register name, echoed in value notifications
    pub name: &'static str,
    /// The request frame to put on the wire
    pub frame: [u8; 8],
}

/// Owns every known device and its registers.
///
/// Devices are kept in discovery order; per-motor registers in insertion
/// order. That order is the deterministic tie-break for scheduling.
#[derive(Debug, Default)]
pub struct MotorRegistry {
    motors: Vec<Motor>,
}

impl MotorRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        MotorRegistry { motors: Vec::new() }
    }

    /// Looks up a device by bus id
    pub fn motor(&self, id: MotorId) -> Option<&Motor> {
        self.motors.iter().find(|m| m.id == id)
    }

    /// Looks up a device by bus id, mutably
    pub fn motor_mut(&mut self, id: MotorId) -> Option<&mut Motor> {
        self.motors.iter_mut().find(|m| m.id == id)
    }

    /// Number of known devices
    pub fn motor_count(&self) -> usize {
        self.motors.len()
    }

    /// Handles a probe acknowledgement: refresh a known device or create an
    /// unknown one seeded with only its model register
    pub fn observe_probe(&mut self, id: MotorId, now: Instant) -> ProbeOutcome {
        match self.motor_mut(id) {
            Some(motor) => {
                motor.last_contact = now;
                ProbeOutcome::Refreshed
            }
            None => {
                self.motors.push(Motor::new(id, now));
                ProbeOutcome::Discovered
            }
        }
    }

    /// Records a device's model number and installs its register template.
    ///
    /// The seed model register stays in place; the template registers join it
    /// never-polled so all become immediately eligible. Returns the full
    /// register table for the discovery notification, or `None` when the
    /// device is unknown or already identified.
    pub fn install_template(&mut self, id: MotorId, model: u16) -> Option<Vec<RegisterSpec>> {
        let motor = self.motor_mut(id)?;
        if motor.is_identified() {
            return None;
        }
        motor.model = Some(model);
        // The model value came from a valid response; record it so a later
        // model poll only notifies on an actual change.
        if let Some(seed) = motor.register_mut(MODEL_NUMBER_ADDR) {
            seed.value = Some(model);
        }
        motor.registers.extend(table::registers_for_model(id, model));
        Some(motor.specs())
    }

    /// Updates a register's poll frequency and makes it immediately eligible.
    /// Returns its name for the notification, or `None` if no such register.
    pub fn set_frequency(&mut self, id: MotorId, address: u8, frequency_ms: u64) -> Option<&'static str> {
        let reg = self.motor_mut(id)?.register_mut(address)?;
        reg.frequency_ms = frequency_ms;
        reg.last_poll = None;
        Some(reg.name)
    }

    /// Forces a refresh of a just-written register on the next scheduling
    /// pass. Returns whether a register was touched.
    pub fn touch_for_refresh(&mut self, id: MotorId, address: u8) -> bool {
        match self.motor_mut(id).and_then(|m| m.register_mut(address)) {
            Some(reg) => {
                reg.last_poll = None;
                true
            }
            None => false,
        }
    }

    /// Looks up one register by device id and address
    pub fn register_mut(&mut self, id: MotorId, address: u8) -> Option<&mut Register> {
        self.motor_mut(id)?.register_mut(address)
    }

    /// Earliest-deadline-first selection: picks the globally most overdue
    /// register, stamps it as polled now, and returns its ticket.
    ///
    /// Selection is unconditional — the minimum deadline wins even when it
    /// lies in the future; frequency orders the bus, it does not idle it.
    /// Ties resolve to the first-seen register.
    pub fn take_due(&mut self, now: Instant) -> Option<PollTicket> {
        let mut best: Option<(Option<Instant>, usize, usize)> = None;
        for (mi, motor) in self.motors.iter().enumerate() {
            for (ri, reg) in motor.registers.iter().enumerate() {
                let key = reg.deadline();
                match &best {
                    Some((k, _, _)) if *k <= key => {}
                    _ => best = Some((key, mi, ri)),
                }
            }
        }
        let (_, mi, ri) = best?;
        let motor_id = self.motors[mi].id;
        let reg = &mut self.motors[mi].registers[ri];
        reg.last_poll = Some(now);
        Some(PollTicket {
            motor: motor_id,
            address: reg.address,
            name: reg.name,
            frame: reg.read_frame,
        })
    }

    /// Liveness sweep: removes every identified device silent for longer than
    /// `window`, registers and all. Unidentified devices are deliberately
    /// exempt. Returns the removed ids.
    pub fn evict_stale(&mut self, now: Instant, window: Duration) -> Vec<MotorId> {
        let mut removed = Vec::new();
        self.motors.retain(|m| {
            let stale = m.is_identified() && now.duration_since(m.last_contact) > window;
            if stale {
                removed.push(m.id);
            }
            !stale
        });
        removed
    }
}
