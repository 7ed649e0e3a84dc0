//! Outbound transfer engine.
//!
//! Fragments one response into units sized for the negotiated MTU and
//! drives them out strictly one at a time: a unit must be confirmed before
//! the next one is framed. The engine never sleeps. Each [`poll`] does at
//! most one send and otherwise just compares timestamps.
//!
//! ```text
//!            start()
//!   Idle ─────────────▶ Sending{attempt} ──send ok──▶ Pending{sent_at}
//!    ▲                     │   ▲  link busy                │
//!    │         retries out │   └──(backoff)                │ acknowledged
//!    │                     ▼                               ▼
//!    └──────────────── Failed ◀── ack timeout ─── next unit or Completed
//! ```
//!
//! [`poll`]: OutboundEngine::poll

use log::{debug, info, warn};

use super::ack::AckState;
use super::channels::SharedLink;
use super::codec::{HEADER_SIZE, PACKET_CAPACITY, TransferPacket};
use crate::app::commands::Endpoint;
use crate::app::ports::{Clock, ConnectionId, Delivery, Link};
use crate::config::Settings;
use crate::error::{LinkError, TransferError};
use crate::index::ProgressDelta;

/// ATT opcode and handle in front of every notification/indication.
const ATT_OVERHEAD: usize = 3;

/// Payload sizes known to survive common peers without silent splitting.
const CAPACITY_LADDER: [usize; 3] = [502, 242, 182];

/// Payload bytes per unit for a negotiated ATT MTU.
pub fn unit_capacity(mtu: u16) -> Result<usize, TransferError> {
    let available = (mtu as usize)
        .saturating_sub(ATT_OVERHEAD)
        .saturating_sub(HEADER_SIZE);
    let unit = CAPACITY_LADDER
        .into_iter()
        .find(|&step| step <= available)
        .unwrap_or(available);
    if unit == 0 {
        return Err(TransferError::UnitTooSmall { mtu });
    }
    Ok(unit)
}

/// Units needed for `len` bytes; an empty payload still takes one.
pub fn unit_count(len: usize, unit: usize) -> Result<u16, TransferError> {
    let units = len.div_ceil(unit).max(1);
    u16::try_from(units).map_err(|_| TransferError::PayloadTooLarge { len })
}

/// Timing and retry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundSettings {
    pub ack_timeout_ms: u32,
    pub send_retries: u8,
    pub retry_backoff_ms: u32,
}

impl From<&Settings> for OutboundSettings {
    fn from(s: &Settings) -> Self {
        Self {
            ack_timeout_ms: s.ack_timeout_ms,
            send_retries: s.send_retries,
            retry_backoff_ms: s.send_retry_backoff_ms,
        }
    }
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed {
        endpoint: Endpoint,
        units: u16,
        bytes: usize,
        /// Progress to credit now that the peer has everything.
        on_complete: Option<ProgressDelta>,
    },
    Failed {
        endpoint: Endpoint,
        error: TransferError,
    },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Sending { attempt: u8, not_before: u64 },
    Pending { sent_at: u64 },
}

struct ActiveTransfer {
    endpoint: Endpoint,
    connection: ConnectionId,
    payload: Vec<u8>,
    unit: usize,
    total: u16,
    next: u16,
    phase: Phase,
    on_complete: Option<ProgressDelta>,
}

impl ActiveTransfer {
    fn frame(&self, out: &mut [u8]) -> Result<usize, TransferError> {
        let start = self.next as usize * self.unit;
        let end = (start + self.unit).min(self.payload.len());
        let chunk = self.payload.get(start..end).unwrap_or_default();
        let packet = TransferPacket::chunk(self.total, self.next, chunk)?;
        Ok(packet.encode(out)?)
    }
}

enum Step {
    Wait,
    Advance,
    Fail(TransferError),
}

pub struct OutboundEngine {
    settings: OutboundSettings,
    active: Option<ActiveTransfer>,
}

impl OutboundEngine {
    pub fn new(settings: OutboundSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Begin sending `payload`. Returns the number of units it was split into.
    ///
    /// Fails with [`TransferError::Busy`] while another transfer holds the
    /// busy flag; nothing is changed in that case.
    pub fn start<L: Link>(
        &mut self,
        shared: &SharedLink,
        link: &L,
        endpoint: Endpoint,
        connection: ConnectionId,
        payload: Vec<u8>,
        on_complete: Option<ProgressDelta>,
    ) -> Result<u16, TransferError> {
        if self.active.is_some() || !shared.try_begin() {
            return Err(TransferError::Busy);
        }
        let sizing = unit_capacity(link.negotiated_unit_size())
            .and_then(|unit| unit_count(payload.len(), unit).map(|total| (unit, total)));
        let (unit, total) = match sizing {
            Ok(s) => s,
            Err(e) => {
                shared.clear_busy();
                return Err(e);
            }
        };
        debug!(
            "TX: {} bytes in {} units of {} ({:?})",
            payload.len(),
            total,
            unit,
            endpoint
        );
        shared.ack.reset();
        self.active = Some(ActiveTransfer {
            endpoint,
            connection,
            payload,
            unit,
            total,
            next: 0,
            phase: Phase::Sending {
                attempt: 0,
                not_before: 0,
            },
            on_complete,
        });
        Ok(total)
    }

    /// Advance the active transfer by at most one send.
    pub fn poll<L: Link, C: Clock>(
        &mut self,
        shared: &SharedLink,
        link: &mut L,
        clock: &C,
    ) -> Option<TransferOutcome> {
        let now = clock.now_ms();
        let settings = self.settings;
        let active = self.active.as_mut()?;
        let step = match active.phase {
            Phase::Sending {
                attempt,
                not_before,
            } => {
                if now < not_before {
                    Step::Wait
                } else {
                    Self::send_unit(active, shared, link, settings, attempt, now)
                }
            }
            Phase::Pending { sent_at } => match shared.ack.load() {
                AckState::Acknowledged => Step::Advance,
                AckState::TimedOut => Step::Fail(TransferError::StackTimeout {
                    index: active.next,
                }),
                AckState::Pending
                    if now.saturating_sub(sent_at) >= u64::from(settings.ack_timeout_ms) =>
                {
                    // Losing the race to a late confirmation just means the
                    // next poll sees Acknowledged.
                    if shared.ack.time_out() {
                        Step::Fail(TransferError::AckTimeout { index: active.next })
                    } else {
                        Step::Wait
                    }
                }
                AckState::Pending => Step::Wait,
                AckState::Idle => Step::Fail(TransferError::LinkLost),
            },
        };

        match step {
            Step::Wait => None,
            Step::Fail(error) => self.fail(shared, error),
            Step::Advance => {
                let active = self.active.as_mut()?;
                active.next += 1;
                if active.next >= active.total {
                    return self.finish(shared);
                }
                shared.ack.reset();
                active.phase = Phase::Sending {
                    attempt: 0,
                    not_before: now,
                };
                None
            }
        }
    }

    /// Drop the active transfer, if any, and release the busy flag.
    pub fn abort(&mut self, shared: &SharedLink, error: TransferError) -> Option<TransferOutcome> {
        let outcome = self.fail(shared, error);
        shared.ack.reset();
        shared.clear_busy();
        outcome
    }

    fn send_unit<L: Link>(
        active: &mut ActiveTransfer,
        shared: &SharedLink,
        link: &mut L,
        settings: OutboundSettings,
        attempt: u8,
        now: u64,
    ) -> Step {
        let mut buf = [0u8; PACKET_CAPACITY];
        let len = match active.frame(&mut buf) {
            Ok(len) => len,
            Err(e) => return Step::Fail(e),
        };

        // Armed before the call; the confirmation may beat send() returning.
        shared.ack.arm();
        match link.send(active.endpoint, active.connection, &buf[..len]) {
            Ok(Delivery::AwaitAck) => {
                active.phase = Phase::Pending { sent_at: now };
                Step::Wait
            }
            Ok(Delivery::Sent) => Step::Advance,
            Err(LinkError::NotConnected) => {
                shared.ack.reset();
                Step::Fail(TransferError::NotConnected)
            }
            Err(e) => {
                shared.ack.reset();
                let attempts = attempt.saturating_add(1);
                if attempts >= settings.send_retries {
                    return Step::Fail(TransferError::SendRejected {
                        index: active.next,
                        attempts,
                    });
                }
                debug!(
                    "TX: unit {} rejected ({}), retry {}/{}",
                    active.next, e, attempts, settings.send_retries
                );
                active.phase = Phase::Sending {
                    attempt: attempts,
                    not_before: now + u64::from(settings.retry_backoff_ms),
                };
                Step::Wait
            }
        }
    }

    fn finish(&mut self, shared: &SharedLink) -> Option<TransferOutcome> {
        let done = self.active.take()?;
        shared.ack.reset();
        shared.clear_busy();
        info!(
            "TX: {} units ({} bytes) delivered on {:?}",
            done.total,
            done.payload.len(),
            done.endpoint
        );
        Some(TransferOutcome::Completed {
            endpoint: done.endpoint,
            units: done.total,
            bytes: done.payload.len(),
            on_complete: done.on_complete,
        })
    }

    fn fail(&mut self, shared: &SharedLink, error: TransferError) -> Option<TransferOutcome> {
        let failed = self.active.take()?;
        shared.ack.reset();
        shared.clear_busy();
        warn!(
            "TX: aborted at unit {}/{} on {:?}: {}",
            failed.next, failed.total, failed.endpoint, error
        );
        Some(TransferOutcome::Failed {
            endpoint: failed.endpoint,
            error,
        })
    }
}

impl Default for OutboundEngine {
    fn default() -> Self {
        Self::new(OutboundSettings::default())
    }
}

// ── Tests ────────────────────────────────────────────────────
