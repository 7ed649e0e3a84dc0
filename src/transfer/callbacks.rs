//! Entry points for the BLE stack's callback context.
//!
//! Everything here returns quickly: no storage, no sleeping, no sending.
//! Work is either fed into the reassembler or latched as a
//! [`PendingCommand`] for the poll loop.

use std::sync::Arc;

use log::{debug, info, warn};

use super::channels::{PendingCommand, SharedLink, json_document};
use super::codec::{PACKET_CAPACITY, TransferPacket, looks_like_packet};
use super::reassembly::Acceptance;
use crate::app::commands::Endpoint;
use crate::app::ports::ConnectionId;

/// What became of one characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A command is waiting for the poll loop.
    Latched,
    /// A unit of a multi-unit upload was stored.
    Assembling { received: u16, total: u16 },
    /// Nothing usable (empty, malformed, duplicate).
    Ignored,
}

#[derive(Clone)]
pub struct LinkCallbacks {
    shared: Arc<SharedLink>,
}

impl LinkCallbacks {
    pub fn new(shared: Arc<SharedLink>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> &Arc<SharedLink> {
        &self.shared
    }

    pub fn on_connect(&self, connection: ConnectionId) {
        info!("BLE: connected (conn {})", connection);
        self.shared.set_connected(connection);
    }

    pub fn on_mtu(&self, mtu: u16) {
        debug!("BLE: MTU {}", mtu);
        self.shared.set_mtu(mtu);
    }

    pub fn on_disconnect(&self) {
        info!("BLE: disconnected");
        self.shared.with_upload(|r| r.reset());
        self.shared.ack.reset();
        self.shared.clear_busy();
        self.shared.clear_mailbox();
        self.shared.mark_disconnected();
    }

    /// Indication confirmed (`true`) or reported failed by the stack.
    pub fn on_indication_status(&self, confirmed: bool) {
        let moved = if confirmed {
            self.shared.ack.acknowledge()
        } else {
            self.shared.ack.time_out()
        };
        if !moved {
            debug!("BLE: late indication status ({}) ignored", confirmed);
        }
    }

    pub fn on_write(&self, endpoint: Endpoint, connection: ConnectionId, data: &[u8]) -> WriteOutcome {
        match endpoint {
            Endpoint::Records => self.on_records_write(connection, data),
            Endpoint::Config => self.on_config_write(connection, data),
        }
    }

    fn on_records_write(&self, connection: ConnectionId, data: &[u8]) -> WriteOutcome {
        if data.len() >= PACKET_CAPACITY {
            return match TransferPacket::decode(data) {
                Ok(packet) => self.latch(Endpoint::Records, connection, &packet.payload),
                Err(e) => {
                    warn!("BLE: undecodable records unit: {}", e);
                    WriteOutcome::Ignored
                }
            };
        }
        self.latch(Endpoint::Records, connection, data)
    }

    fn on_config_write(&self, connection: ConnectionId, data: &[u8]) -> WriteOutcome {
        if json_document(data).is_some() || !looks_like_packet(data) {
            return self.latch(Endpoint::Config, connection, data);
        }
        let packet = match TransferPacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("BLE: undecodable config unit: {}", e);
                return WriteOutcome::Ignored;
            }
        };
        match self.shared.with_upload(|r| r.offer(packet)) {
            Acceptance::Accepted { received, total } => {
                self.shared.touch_upload();
                WriteOutcome::Assembling { received, total }
            }
            Acceptance::Complete(buffer) => {
                self.shared.touch_upload();
                info!("BLE: upload complete ({} bytes)", buffer.len());
                self.latch(Endpoint::Config, connection, &buffer)
            }
            Acceptance::Discarded(reason) => {
                debug!("BLE: upload unit discarded ({:?})", reason);
                WriteOutcome::Ignored
            }
        }
    }

    fn latch(&self, endpoint: Endpoint, connection: ConnectionId, message: &[u8]) -> WriteOutcome {
        let Some(command) = PendingCommand::from_message(endpoint, connection, message) else {
            return WriteOutcome::Ignored;
        };
        if self.shared.has_command() {
            debug!("BLE: unread command replaced");
        }
        self.shared.post(command);
        WriteOutcome::Latched
    }
}

// ── Tests ────────────────────────────────────────────────────
