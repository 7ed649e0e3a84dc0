//! Connection and upload supervision, polling side.
//!
//! The callback context clears shared state the moment the peer goes away
//! and bumps the disconnect epoch. Here the poll loop notices the new epoch
//! and drops what only it owns (the outbound transfer). A separate watchdog
//! abandons uploads whose chunks stopped arriving.
//!
//! ```text
//!   Disconnected ──connect──▶ Connected ──unit 0──▶ Uploading
//!        ▲                     │   ▲                   │ complete / stall
//!        │                     │   └───────────────────┘
//!        │            response │   ▲
//!        │                     ▼   │ delivered / failed
//!        └───── disconnect ── Downloading
//! ```

use log::{info, warn};

use super::channels::SharedLink;
use super::outbound::{OutboundEngine, TransferOutcome};
use crate::app::ports::Clock;
use crate::config::Settings;
use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Uploading,
    Downloading,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    LinkUp { mtu: u16 },
    /// `aborted` holds the outbound transfer cut short, if one was active.
    LinkLost { aborted: Option<TransferOutcome> },
    UploadAbandoned { received: u16, expected: u16 },
}

/// At most one of each per poll.
pub type SupervisorEvents = heapless::Vec<SupervisorEvent, 3>;

pub struct ConnectionSupervisor {
    upload_timeout_ms: u32,
    epoch: u32,
    was_connected: bool,
    activity: u32,
    activity_at: u64,
}

impl ConnectionSupervisor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            upload_timeout_ms: settings.upload_timeout_ms,
            epoch: 0,
            was_connected: false,
            activity: 0,
            activity_at: 0,
        }
    }

    pub fn state(&self, shared: &SharedLink) -> LinkState {
        if !shared.is_connected() {
            LinkState::Disconnected
        } else if shared.with_upload(|r| r.is_active()) {
            LinkState::Uploading
        } else if shared.is_busy() {
            LinkState::Downloading
        } else {
            LinkState::Connected
        }
    }

    pub fn poll<C: Clock>(
        &mut self,
        shared: &SharedLink,
        engine: &mut OutboundEngine,
        clock: &C,
    ) -> SupervisorEvents {
        let mut events = SupervisorEvents::new();
        let now = clock.now_ms();

        let epoch = shared.disconnect_epoch();
        if epoch != self.epoch {
            self.epoch = epoch;
            self.was_connected = false;
            // Upload and mailbox were cleared in callback context; a
            // reconnected peer may already have refilled them.
            let aborted = engine.abort(shared, TransferError::LinkLost);
            info!("Link: peer lost, outbound transfer dropped");
            let _ = events.push(SupervisorEvent::LinkLost { aborted });
        }

        let connected = shared.is_connected();
        if connected && !self.was_connected {
            let mtu = shared.mtu();
            info!("Link: peer connected (MTU {})", mtu);
            let _ = events.push(SupervisorEvent::LinkUp { mtu });
        }
        self.was_connected = connected;

        if let Some(abandoned) = self.watch_upload(shared, now) {
            let _ = events.push(abandoned);
        }
        events
    }

    fn watch_upload(&mut self, shared: &SharedLink, now: u64) -> Option<SupervisorEvent> {
        let activity = shared.upload_activity();
        if activity != self.activity {
            self.activity = activity;
            self.activity_at = now;
            return None;
        }
        let Some((received, expected)) = shared.with_upload(|r| r.progress()) else {
            self.activity_at = now;
            return None;
        };
        if now.saturating_sub(self.activity_at) < u64::from(self.upload_timeout_ms) {
            return None;
        }
        // Re-checked under the lock: a unit may have landed since.
        let reset = shared.with_upload(|r| {
            let stale = r.progress() == Some((received, expected));
            if stale {
                r.reset();
            }
            stale
        });
        self.activity_at = now;
        if !reset {
            return None;
        }
        warn!(
            "Upload: no unit for {} ms, abandoned at {}/{}",
            self.upload_timeout_ms, received, expected
        );
        Some(SupervisorEvent::UploadAbandoned { received, expected })
    }
}

// ── Tests ────────────────────────────────────────────────────
