//! Acknowledgement cell shared between the stack callback and the poll loop.
//!
//! ```text
//!            arm()               acknowledge()
//!   Idle ───────────▶ Pending ─────────────────▶ Acknowledged
//!     ▲                  │                            │
//!     │                  │ time_out()                 │
//!     │                  ▼                            │
//!     └──────────── TimedOut ◀────────────────────────┘ reset()
//! ```
//!
//! The poll loop arms the cell *before* handing a unit to the stack, so a
//! confirmation that races ahead of `send()` returning is never lost. All
//! transitions out of `Pending` are compare-and-swap; a late confirmation
//! after a timeout does nothing.

use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckState {
    Idle = 0,
    Pending = 1,
    Acknowledged = 2,
    TimedOut = 3,
}

impl AckState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Pending,
            2 => Self::Acknowledged,
            3 => Self::TimedOut,
            _ => Self::Idle,
        }
    }
}

pub struct AckCell(AtomicU8);

impl AckCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(AckState::Idle as u8))
    }

    pub fn load(&self) -> AckState {
        AckState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Expect a confirmation for the unit about to be sent.
    pub fn arm(&self) {
        self.0.store(AckState::Pending as u8, Ordering::Release);
    }

    /// Called from the stack when the peer confirmed. Returns `false` when
    /// nothing was pending.
    pub fn acknowledge(&self) -> bool {
        self.transition(AckState::Pending, AckState::Acknowledged)
    }

    /// Called when the stack reports a failed indication, or by the poll
    /// loop when the ack deadline passed.
    pub fn time_out(&self) -> bool {
        self.transition(AckState::Pending, AckState::TimedOut)
    }

    pub fn reset(&self) {
        self.0.store(AckState::Idle as u8, Ordering::Release);
    }

    fn transition(&self, from: AckState, to: AckState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AckCell {
    fn default() -> Self {
        Self::new()
    }
}
