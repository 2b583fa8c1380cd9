use serde::{Deserialize, Serialize};

use crate::core::{MotorId, RegisterSpec};

/// Commands accepted from the host.
///
/// Tag and field names are the wire contract and stay camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
    /// Open the bus and start the engine timers
    #[serde(rename = "init")]
    Init {
        /// Serial port to open, e.g. `/dev/ttyUSB0`
        #[serde(rename = "portName")]
        port_name: String,
        /// Bus baud rate
        #[serde(rename = "baudRate")]
        baud_rate: u32,
    },

    /// Graceful teardown, then process exit
    #[serde(rename = "shutdown")]
    Shutdown,

    /// Change one register's poll frequency
    #[serde(rename = "updateReadFrequency")]
    UpdateReadFrequency {
        #[serde(rename = "motorID")]
        motor_id: MotorId,
        /// Control-table address of the register
        address: u8,
        /// New poll frequency in milliseconds
        frequency: u64,
    },

    /// Fire-and-forget register write
    #[serde(rename = "writeRegister")]
    WriteRegister {
        #[serde(rename = "motorID")]
        motor_id: MotorId,
        /// Control-table address to write
        address: u8,
        /// Value width in bytes (1 or 2)
        #[serde(rename = "numBytes")]
        num_bytes: u8,
        /// Value, little-endian on the bus
        value: u16,
    },
}

/// Notifications emitted to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Notice {
    /// The transport is open and polling is about to begin
    #[serde(rename = "opened")]
    Opened,

    /// First contact with an unseen device id
    #[serde(rename = "motorEncountered")]
    MotorEncountered { motor: MotorId },

    /// Device identified; carries its full register table
    #[serde(rename = "motorAdded")]
    MotorAdded {
        motor: MotorId,
        registers: Vec<RegisterSpec>,
    },

    /// Identified device went silent and was evicted
    #[serde(rename = "motorRemoved")]
    MotorRemoved { motor: MotorId },

    /// A polled register produced a value different from its last one
    #[serde(rename = "valueUpdated")]
    ValueUpdated {
        motor: MotorId,
        name: String,
        value: u16,
    },

    /// A register's poll frequency was changed by command
    #[serde(rename = "frequencyUpdated")]
    FrequencyUpdated {
        motor: MotorId,
        name: String,
        frequency: u64,
    },

    /// Periodic counters: read requests sent and checksum-valid responses
    #[serde(rename = "statUpdate")]
    StatUpdate { requests: u64, hits: u64 },

    /// The worker is exiting
    #[serde(rename = "terminated")]
    Terminated,
}
