use tokio::time::{Duration, Instant};

use crate::core::MotorId;

/// The read request currently on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutstandingPoll {
    /// Device the request was addressed to
    pub motor: MotorId,
    /// Requested control-table address
    pub address: u8,
    /// Register name, echoed in notifications and logs
    pub name: &'static str,
    /// When the request was written
    pub sent_at: Instant,
}

/// Tracks the single in-flight read request and its timeout.
///
/// The bus is half-duplex: at most one read request may be outstanding, and
/// the next one goes out only after the current one resolves by response or
/// by timeout.
#[derive(Debug)]
pub struct PollScheduler {
    outstanding: Option<OutstandingPoll>,
    timeout: Duration,
}

impl PollScheduler {
    /// Creates an idle scheduler with the given response timeout
    pub fn new(timeout: Duration) -> Self {
        PollScheduler {
            outstanding: None,
            timeout,
        }
    }

    /// Whether a request is currently on the wire
    pub fn in_flight(&self) -> bool {
        self.outstanding.is_some()
    }

    /// The request currently on the wire, if any
    pub fn outstanding(&self) -> Option<&OutstandingPoll> {
        self.outstanding.as_ref()
    }

    /// Records a freshly written read request
    pub fn arm(&mut self, motor: MotorId, address: u8, name: &'static str, now: Instant) {
        self.outstanding = Some(OutstandingPoll {
            motor,
            address,
            name,
            sent_at: now,
        });
    }

    /// Clears the in-flight slot, returning what was outstanding
    pub fn resolve(&mut self) -> Option<OutstandingPoll> {
        self.outstanding.take()
    }

    /// Instant at which the outstanding request gives up, if one is armed
    pub fn timeout_deadline(&self) -> Option<Instant> {
        self.outstanding.as_ref().map(|poll| poll.sent_at + self.timeout)
    }
}
