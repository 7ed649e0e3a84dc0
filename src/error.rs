//! Error types for the transfer core.
//!
//! Each layer owns a small `Copy` error enum. Storage and config errors
//! live next to their ports in [`crate::app::ports`]. None of these are
//! fatal: the transfer core recovers by retry, timeout or peer reconnection.

use core::fmt;

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than the fixed 10-byte header.
    Truncated { len: usize },
    /// Output buffer cannot hold header plus payload.
    BufferTooSmall { needed: usize },
    /// Chunk payload exceeds the 502-byte unit maximum.
    PayloadTooLarge { len: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "truncated unit ({len} bytes)"),
            Self::BufferTooSmall { needed } => write!(f, "buffer too small ({needed} needed)"),
            Self::PayloadTooLarge { len } => write!(f, "chunk payload too large ({len} bytes)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound transfer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Another outbound transfer is still in flight.
    Busy,
    /// Negotiated MTU leaves no room for payload after the header.
    UnitTooSmall { mtu: u16 },
    /// Payload would need more than `u16::MAX` units.
    PayloadTooLarge { len: usize },
    /// No peer connected when the unit was due.
    NotConnected,
    /// The stack kept rejecting the unit after every retry.
    SendRejected { index: u16, attempts: u8 },
    /// No acknowledgement within the ack timeout.
    AckTimeout { index: u16 },
    /// The stack itself reported the indication as failed.
    StackTimeout { index: u16 },
    /// The link dropped while the transfer was active.
    LinkLost,
    /// A unit could not be framed.
    Codec(CodecError),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "transfer already active"),
            Self::UnitTooSmall { mtu } => write!(f, "MTU {mtu} too small for a transfer unit"),
            Self::PayloadTooLarge { len } => write!(f, "payload of {len} bytes exceeds unit count"),
            Self::NotConnected => write!(f, "no peer connected"),
            Self::SendRejected { index, attempts } => {
                write!(f, "unit {index} rejected after {attempts} attempts")
            }
            Self::AckTimeout { index } => write!(f, "unit {index} not acknowledged in time"),
            Self::StackTimeout { index } => write!(f, "stack reported failure for unit {index}"),
            Self::LinkLost => write!(f, "link lost mid-transfer"),
            Self::Codec(e) => write!(f, "framing failed: {e}"),
        }
    }
}

impl From<CodecError> for TransferError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

/// Low-level send failures reported by a [`Link`](crate::app::ports::Link).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No peer is connected; retrying is pointless.
    NotConnected,
    /// Stack congested (e.g. no free ACL buffers); retry shortly.
    Busy,
    /// Stack returned an error code; treated as transient.
    Stack(i32),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Busy => write!(f, "link busy"),
            Self::Stack(code) => write!(f, "stack error {code}"),
        }
    }
}
