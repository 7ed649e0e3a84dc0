//! Inbound reassembly of multi-unit uploads.
//!
//! Units may arrive in any order and may be repeated. The buffer is only
//! released once every index `0..total` has been seen, and is concatenated
//! by index, not by arrival.
//!
//! ```text
//!   Idle ──index 0──▶ Collecting{total, slots} ──all slots──▶ Complete
//!    ▲                     │  ▲
//!    │             reset() │  └── total changed: restart from that unit
//!    └─────────────────────┘
//! ```

use log::{debug, warn};

use super::codec::TransferPacket;

/// Why a unit was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// `total_units` is zero or above the configured ceiling.
    Malformed,
    /// No upload in progress and the unit is not index 0.
    NotStarted,
    /// `chunk_index >= total_units`.
    OutOfRange,
    /// Slot already filled.
    Duplicate,
}

/// Outcome of offering one unit to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    Accepted { received: u16, total: u16 },
    Complete(Vec<u8>),
    Discarded(DiscardReason),
}

struct Collecting {
    total: u16,
    slots: Vec<Option<heapless::Vec<u8, { super::codec::MAX_PAYLOAD }>>>,
    received: u16,
}

pub struct Reassembler {
    max_units: u16,
    state: Option<Collecting>,
}

impl Reassembler {
    pub const DEFAULT_MAX_UNITS: u16 = 256;

    pub fn new(max_units: u16) -> Self {
        Self {
            max_units,
            state: None,
        }
    }

    /// Store `packet`, reporting what happened to it.
    pub fn offer(&mut self, packet: TransferPacket) -> Acceptance {
        let total = packet.total_units;
        let index = packet.chunk_index;

        if total == 0 || total > self.max_units {
            warn!("Upload: malformed unit (total={})", total);
            return Acceptance::Discarded(DiscardReason::Malformed);
        }

        if index >= total {
            warn!("Upload: unit {} outside total {}", index, total);
            return Acceptance::Discarded(DiscardReason::OutOfRange);
        }

        let mut restart = false;
        if let Some(state) = &self.state {
            if state.total != total {
                warn!(
                    "Upload: total changed {} -> {}, dropping {} units",
                    state.total, total, state.received
                );
                self.state = None;
                restart = true;
            } else if index == 0 {
                // The peer restarted with a different first unit.
                let same = state.slots[0]
                    .as_ref()
                    .is_some_and(|p| p.as_slice() == packet.payload.as_slice());
                if state.slots[0].is_some() && !same {
                    debug!("Upload: index 0 with new content, restarting");
                    self.state = None;
                }
            }
        }

        if self.state.is_none() {
            if index != 0 && !restart {
                debug!("Upload: unit {} before start, discarded", index);
                return Acceptance::Discarded(DiscardReason::NotStarted);
            }
            self.state = Some(Collecting {
                total,
                slots: vec![None; total as usize],
                received: 0,
            });
        }

        let Some(state) = self.state.as_mut() else {
            return Acceptance::Discarded(DiscardReason::NotStarted);
        };

        let slot = &mut state.slots[index as usize];
        if slot.is_some() {
            return Acceptance::Discarded(DiscardReason::Duplicate);
        }
        *slot = Some(packet.payload);
        state.received += 1;

        if state.received < state.total {
            return Acceptance::Accepted {
                received: state.received,
                total: state.total,
            };
        }

        let mut complete = Vec::new();
        if let Some(done) = self.state.take() {
            for part in done.slots.into_iter().flatten() {
                complete.extend_from_slice(&part);
            }
        }
        Acceptance::Complete(complete)
    }

    /// Like [`offer`](Self::offer), keeping only the completed buffer.
    pub fn accept(&mut self, packet: TransferPacket) -> Option<Vec<u8>> {
        match self.offer(packet) {
            Acceptance::Complete(buf) => Some(buf),
            _ => None,
        }
    }

    /// `(received, total)` of the upload in progress.
    pub fn progress(&self) -> Option<(u16, u16)> {
        self.state.as_ref().map(|s| (s.received, s.total))
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Discard any partial upload.
    pub fn reset(&mut self) {
        self.state = None;
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_UNITS)
    }
}

// ── Tests ────────────────────────────────────────────────────
