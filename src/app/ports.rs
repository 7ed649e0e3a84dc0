//! Port traits — the hexagonal boundary between the transfer core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ TransferService / CommandDispatcher (domain)
//! ```
//!
//! Driven adapters (BLE stack, SD card, NVS, clock, event sinks) implement
//! these traits. The domain consumes them via generics, so the transfer core
//! never touches the radio or the filesystem directly and runs unchanged on
//! the host under test.

use crate::app::commands::Endpoint;
use crate::app::events::TransferEvent;
use crate::config::DeviceConfig;
use crate::error::LinkError;
use crate::records::{Record, Timestamp};

/// Connection handle assigned by the BLE stack.
pub type ConnectionId = u16;

// ───────────────────────────────────────────────────────────────
// Link port (driven adapter: domain → radio)
// ───────────────────────────────────────────────────────────────

/// How the stack will confirm a unit handed to [`Link::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Indication queued; confirmation arrives later via the callback context.
    AwaitAck,
    /// Notification sent; no confirmation will follow.
    Sent,
}

/// The low-level transmit primitive.
pub trait Link {
    /// Current ATT MTU for the connected peer.
    fn negotiated_unit_size(&self) -> u16;

    /// Hand one encoded unit to the stack.
    ///
    /// [`LinkError::Busy`] and [`LinkError::Stack`] are retried by the
    /// caller; [`LinkError::NotConnected`] aborts the transfer.
    fn send(
        &mut self,
        endpoint: Endpoint,
        connection: ConnectionId,
        frame: &[u8],
    ) -> Result<Delivery, LinkError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

pub trait Clock {
    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Block the calling task. Only used on the polling side.
    fn delay_ms(&self, ms: u32);

    /// Wall-clock time, `None` until the RTC has been set.
    fn current_time(&self) -> Option<Timestamp>;
}

// ───────────────────────────────────────────────────────────────
// File store port (driven adapter: domain ↔ SD card)
// ───────────────────────────────────────────────────────────────

/// Path-addressed storage on the removable card.
///
/// Paths are absolute within the card (`/measurements/index.csv`).
/// Handles are cheap to clone and share one underlying medium.
pub trait FileStore {
    /// Whole-file read.
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Read up to `len` bytes from `offset`; short at end of file.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, StorageError>;

    /// Replace the file atomically: readers see the old or the new
    /// content, never a mix. Creates parent directories.
    fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Append to the file, creating it if needed.
    fn append(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    fn exists(&self, path: &str) -> bool;

    fn size(&self, path: &str) -> Result<u64, StorageError>;

    fn remove(&self, path: &str) -> Result<(), StorageError>;

    fn create_dir_all(&self, path: &str) -> Result<(), StorageError>;

    /// Names (not paths) of the regular files directly inside `dir`.
    fn list(&self, dir: &str) -> Result<Vec<String>, StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Record store port (driven adapter: domain ↔ measurement log)
// ───────────────────────────────────────────────────────────────

pub trait RecordStore {
    fn store_record(&mut self, record: &Record) -> Result<(), StorageError>;

    /// Records physically present on the medium.
    fn record_count(&self) -> Result<u32, StorageError>;

    /// Records `start..=end`, clipped to what exists.
    fn load_records(&self, start: u32, end: u32) -> Result<Vec<Record>, StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain → live configuration)
// ───────────────────────────────────────────────────────────────

/// Receives a freshly uploaded, validated configuration.
///
/// Implementations reconfigure the sampling loop and persist whatever
/// must survive a reboot outside the SD card (e.g. the BLE name in NVS).
pub trait ConfigPort {
    fn apply(&mut self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage in NVS.
///
/// Keys are namespaced to prevent collisions between subsystems. Writes
/// must be atomic; the ESP-IDF NVS commit guarantees this natively.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`TransferEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &TransferEvent);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations and config parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Document is not well-formed.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`FileStore`], [`RecordStore`] and [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested file or key does not exist.
    NotFound,
    /// Medium is full.
    Full,
    /// No card mounted.
    Unavailable,
    /// Path escapes the card root or is otherwise unusable.
    InvalidPath,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Full => write!(f, "storage full"),
            Self::Unavailable => write!(f, "storage unavailable"),
            Self::InvalidPath => write!(f, "invalid path"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
