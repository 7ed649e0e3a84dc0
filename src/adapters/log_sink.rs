//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing transfer events to the ESP-IDF
//! logger (UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::TransferEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`TransferEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink {
    failures: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers that failed since boot.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::LinkUp { mtu } => info!("LINK  | up, mtu={}", mtu),
            TransferEvent::LinkLost => info!("LINK  | lost"),
            TransferEvent::CommandReceived { endpoint, command } => {
                info!("CMD   | {:?} 0x{:02x}", endpoint, command);
            }
            TransferEvent::TransferStarted {
                endpoint,
                units,
                bytes,
            } => info!("TX    | {:?} start, {} bytes / {} units", endpoint, bytes, units),
            TransferEvent::TransferCompleted {
                endpoint,
                units,
                bytes,
            } => info!("TX    | {:?} done, {} bytes / {} units", endpoint, bytes, units),
            TransferEvent::TransferFailed { endpoint, error } => {
                self.failures = self.failures.saturating_add(1);
                warn!("TX    | {:?} failed: {}", endpoint, error);
            }
            TransferEvent::UploadAbandoned { received, expected } => {
                warn!("RX    | upload abandoned at {}/{}", received, expected);
            }
            TransferEvent::ConfigApplied => info!("CFG   | new configuration applied"),
            TransferEvent::IndexRepaired { before, after } => warn!(
                "INDEX | repaired {}/{} -> {}/{}",
                before.measured, before.transmitted, after.measured, after.transmitted
            ),
            TransferEvent::MeasurementsStored { count, measured } => {
                info!("DATA  | +{} records, {} total", count, measured);
            }
        }
    }
}
