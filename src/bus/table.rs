//! Model register templates
//!
//! The baseline control table shared by every model, plus the model-specific
//! amendments selected once a device reports its model number.

use crate::core::{MotorId, RegisterWidth};
use crate::protocol::MODEL_NUMBER_ADDR;

use super::registry::Register;

use RegisterWidth::{Byte, Word};

/// Poll frequency for configuration registers that almost never change
pub const SLOW_POLL_MS: u64 = 86_400_000;

/// EX-106: gains a drive-mode and sensed-current pair
pub const MODEL_EX106: u16 = 0x6B;

/// MX-28: compliance block replaced by PID gains
pub const MODEL_MX28: u16 = 0x1D;

/// MX-64: PID gains plus torque-control registers
pub const MODEL_MX64: u16 = 0x36;

/// MX-106: PID gains plus torque-control registers
pub const MODEL_MX106: u16 = 0x40;

/// Baseline control table: name, address, width, poll frequency (ms)
const BASELINE: &[(&str, u8, RegisterWidth, u64)] = &[
    ("firmwareVersion", 0x02, Byte, SLOW_POLL_MS),
    ("baudRate", 0x04, Byte, SLOW_POLL_MS),
    ("returnDelayTime", 0x05, Byte, SLOW_POLL_MS),
    ("cwAngleLimit", 0x06, Word, SLOW_POLL_MS),
    ("ccwAngleLimit", 0x08, Word, SLOW_POLL_MS),
    ("highTempLimit", 0x0B, Byte, SLOW_POLL_MS),
    ("lowVoltageLimit", 0x0C, Byte, SLOW_POLL_MS),
    ("highVoltageLimit", 0x0D, Byte, SLOW_POLL_MS),
    ("maxTorque", 0x0E, Word, SLOW_POLL_MS),
    ("statusReturnLevel", 0x10, Byte, SLOW_POLL_MS),
    ("alarmLED", 0x11, Byte, 500),
    ("alarmShutdown", 0x12, Byte, 500),
    ("torqueEnable", 0x18, Byte, SLOW_POLL_MS),
    ("led", 0x19, Byte, SLOW_POLL_MS),
    ("cwComplianceMargin", 0x1A, Byte, SLOW_POLL_MS),
    ("ccwComplianceMargin", 0x1B, Byte, SLOW_POLL_MS),
    ("cwComplianceSlope", 0x1C, Byte, SLOW_POLL_MS),
    ("ccwComplianceSlope", 0x1D, Byte, SLOW_POLL_MS),
    ("goalPosition", 0x1E, Word, SLOW_POLL_MS),
    ("movingSpeed", 0x20, Word, SLOW_POLL_MS),
    ("torqueLimit", 0x22, Word, SLOW_POLL_MS),
    ("presentPosition", 0x24, Word, 16),
    ("presentSpeed", 0x26, Word, 16),
    ("presentLoad", 0x28, Word, 16),
    ("presentVoltage", 0x2A, Byte, 250),
    ("presentTemp", 0x2B, Byte, 250),
    ("registered", 0x2C, Byte, SLOW_POLL_MS),
    ("moving", 0x2E, Byte, SLOW_POLL_MS),
    ("lock", 0x2F, Byte, SLOW_POLL_MS),
    ("punch", 0x30, Word, SLOW_POLL_MS),
];

/// The single register every new device starts with: its model number
pub fn seed_register(motor: MotorId) -> Register {
    Register::new(motor, "modelNumber", MODEL_NUMBER_ADDR, Word, SLOW_POLL_MS)
}

/// Builds the register template for a reported model number.
///
/// The returned set does not include the model register itself; the caller
/// appends these to the seeded device.
pub fn registers_for_model(motor: MotorId, model: u16) -> Vec<Register> {
    let mut regs: Vec<Register> = BASELINE
        .iter()
        .map(|&(name, address, width, freq)| Register::new(motor, name, address, width, freq))
        .collect();

    if model == MODEL_EX106 {
        regs.push(Register::new(motor, "driveMode", 0x0A, Byte, SLOW_POLL_MS));
        regs.push(Register::new(motor, "sensedCurrent", 0x38, Word, SLOW_POLL_MS));
    }

    if matches!(model, MODEL_MX28 | MODEL_MX64 | MODEL_MX106) {
        // PID gains take over the compliance block addresses 0x1A-0x1D
        if let Some(start) = regs.iter().position(|r| r.address == 0x1A) {
            let gains = [
                Register::new(motor, "dGain", 0x1A, Byte, SLOW_POLL_MS),
                Register::new(motor, "iGain", 0x1B, Byte, SLOW_POLL_MS),
                Register::new(motor, "pGain", 0x1C, Byte, SLOW_POLL_MS),
            ];
            regs.splice(start..start + 4, gains);
        }
        regs.push(Register::new(motor, "goalAcceleration", 0x49, Byte, SLOW_POLL_MS));
    }

    if matches!(model, MODEL_MX64 | MODEL_MX106) {
        regs.push(Register::new(motor, "current", 0x44, Word, SLOW_POLL_MS));
        regs.push(Register::new(motor, "torqueControlEnable", 0x46, Byte, SLOW_POLL_MS));
        regs.push(Register::new(motor, "goalTorque", 0x47, Word, SLOW_POLL_MS));
    }

    regs
}
