//! State shared between the BLE callback context and the poll loop.
//!
//! ```text
//! ┌────────────────────┐  PendingCommand (Signal)  ┌────────────────┐
//! │  GATT callbacks    │─────────────────────────▶│  poll loop     │
//! │  (stack task)      │  AckCell / flags          │  (main task)   │
//! │                    │◀────────────────────────▶│                │
//! └────────────────────┘  Reassembler (Mutex)      └────────────────┘
//! ```
//!
//! Flags are plain atomics. The command mailbox is an `embassy-sync`
//! [`Signal`]: a single slot where a newer write replaces an unread one.
//! The reassembler sits behind a critical-section mutex since both sides
//! touch it (callbacks feed it, the supervisor clears it).

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use super::ack::AckCell;
use super::reassembly::Reassembler;
use crate::app::commands::{ConfigCommand, Endpoint};
use crate::app::ports::ConnectionId;

/// ATT default before the exchange completes.
pub const DEFAULT_MTU: u16 = 23;

/// A command latched by the callback context, executed by the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub endpoint: Endpoint,
    pub command: u8,
    pub connection: ConnectionId,
    pub payload: Vec<u8>,
}

impl PendingCommand {
    /// Split a raw characteristic write into command byte and arguments.
    ///
    /// A message whose first readable byte is `{` is a configuration
    /// document regardless of what precedes it. Otherwise the first byte
    /// is the command. Record arguments run up to the first NUL; config
    /// arguments are kept whole since SAVE_FILE pads its name field with
    /// NULs.
    pub fn from_message(endpoint: Endpoint, connection: ConnectionId, data: &[u8]) -> Option<Self> {
        if let Some(doc) = json_document(data) {
            return Some(Self {
                endpoint: Endpoint::Config,
                command: ConfigCommand::NewConfig as u8,
                connection,
                payload: doc.to_vec(),
            });
        }
        let (&command, rest) = data.split_first()?;
        let args = match endpoint {
            Endpoint::Records => rest.split(|&b| b == 0).next().unwrap_or_default(),
            Endpoint::Config => rest,
        };
        Some(Self {
            endpoint,
            command,
            connection,
            payload: args.to_vec(),
        })
    }
}

/// The message from its first `{` onward, if that is the first byte that
/// is neither whitespace nor NUL.
pub fn json_document(data: &[u8]) -> Option<&[u8]> {
    let start = data
        .iter()
        .position(|&b| b != 0 && !b.is_ascii_whitespace())?;
    (data[start] == b'{').then(|| &data[start..])
}

/// Everything both contexts touch.
pub struct SharedLink {
    pub ack: AckCell,
    busy: AtomicBool,
    connected: AtomicBool,
    connection: AtomicU16,
    mtu: AtomicU16,
    /// Bumped on every disconnect; the poll side compares epochs.
    disconnects: AtomicU32,
    /// Bumped on every accepted upload unit; feeds the upload watchdog.
    upload_activity: AtomicU32,
    mailbox: Signal<CriticalSectionRawMutex, PendingCommand>,
    upload: Mutex<CriticalSectionRawMutex, RefCell<Reassembler>>,
}

impl SharedLink {
    pub fn new(max_upload_units: u16) -> Self {
        Self {
            ack: AckCell::new(),
            busy: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connection: AtomicU16::new(0),
            mtu: AtomicU16::new(DEFAULT_MTU),
            disconnects: AtomicU32::new(0),
            upload_activity: AtomicU32::new(0),
            mailbox: Signal::new(),
            upload: Mutex::new(RefCell::new(Reassembler::new(max_upload_units))),
        }
    }

    // --- Link state ---

    pub fn set_connected(&self, connection: ConnectionId) {
        self.connection.store(connection, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.mtu.store(DEFAULT_MTU, Ordering::Release);
        self.disconnects.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection.load(Ordering::Acquire)
    }

    pub fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::Release);
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    pub fn disconnect_epoch(&self) -> u32 {
        self.disconnects.load(Ordering::Acquire)
    }

    // --- Outbound busy flag ---

    /// Claim the outbound slot. `false` when a transfer is already active.
    pub fn try_begin(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_busy(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    // --- Mailbox ---

    /// Latch a command, replacing any unread one.
    pub fn post(&self, command: PendingCommand) {
        self.mailbox.signal(command);
    }

    pub fn take_command(&self) -> Option<PendingCommand> {
        self.mailbox.try_take()
    }

    pub fn has_command(&self) -> bool {
        self.mailbox.signaled()
    }

    pub fn clear_mailbox(&self) {
        self.mailbox.reset();
    }

    // --- Upload ---

    pub fn with_upload<R>(&self, f: impl FnOnce(&mut Reassembler) -> R) -> R {
        self.upload.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn touch_upload(&self) {
        self.upload_activity.fetch_add(1, Ordering::AcqRel);
    }

    pub fn upload_activity(&self) -> u32 {
        self.upload_activity.load(Ordering::Acquire)
    }
}

impl Default for SharedLink {
    fn default() -> Self {
        Self::new(Reassembler::DEFAULT_MAX_UNITS)
    }
}

// ── Tests ────────────────────────────────────────────────────
