//! Outbound application events.
//!
//! The transfer core emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log to serial, blink the status LED,
//! count failures for the sleep scheduler, etc.

use crate::app::commands::Endpoint;
use crate::error::TransferError;
use crate::index::ProgressIndex;

/// Structured events emitted by the transfer core.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A peer connected (first poll after the stack reported it).
    LinkUp { mtu: u16 },

    /// The peer went away; all in-flight state was dropped.
    LinkLost,

    /// A command was taken from the mailbox for execution.
    CommandReceived { endpoint: Endpoint, command: u8 },

    /// A response started going out.
    TransferStarted {
        endpoint: Endpoint,
        units: u16,
        bytes: usize,
    },

    /// Every unit of a response was acknowledged.
    TransferCompleted {
        endpoint: Endpoint,
        units: u16,
        bytes: usize,
    },

    /// A response was abandoned.
    TransferFailed {
        endpoint: Endpoint,
        error: TransferError,
    },

    /// A partial inbound upload timed out and was discarded.
    UploadAbandoned { received: u16, expected: u16 },

    /// A new `config.json` was stored and handed to the live config.
    ConfigApplied,

    /// The progress index disagreed with the medium and was corrected.
    IndexRepaired {
        before: ProgressIndex,
        after: ProgressIndex,
    },

    /// New records were appended to the measurement log.
    MeasurementsStored { count: u32, measured: u32 },
}
