//! Transfer service, the polling-side core.
//!
//! [`TransferService`] owns the dispatcher, the outbound engine and the
//! connection supervisor. The main loop calls [`poll`](TransferService::poll)
//! once per iteration; the BLE stack talks to the [`LinkCallbacks`] handed
//! out by [`callbacks`](TransferService::callbacks).
//!
//! ```text
//!  LinkCallbacks ──▶ SharedLink ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                                   │       TransferService        │
//!           Link ◀──────────────────│ Supervisor · Engine · Dispatch│
//!                                   └──────────────────────────────┘
//!                                       │ FileStore · RecordStore
//!                                       ▼ ConfigPort · Clock
//! ```

use std::sync::Arc;

use log::{info, warn};

use crate::config::Settings;
use crate::error::TransferError;
use crate::index::{ProgressIndex, Repair};
use crate::records::{Record, SensorReading, Timestamp};
use crate::transfer::outbound::OutboundSettings;
use crate::transfer::supervisor::SupervisorEvent;
use crate::transfer::{
    CommandDispatcher, ConnectionSupervisor, LinkCallbacks, LinkState, OutboundEngine,
    PendingCommand, SharedLink, TransferOutcome,
};

use super::events::TransferEvent;
use super::ports::{Clock, ConfigPort, EventSink, FileStore, Link, RecordStore, StorageError};

pub struct TransferService<F, R, P, C>
where
    F: FileStore,
    R: RecordStore,
    P: ConfigPort,
    C: Clock,
{
    shared: Arc<SharedLink>,
    dispatcher: CommandDispatcher<F, R, P, C>,
    engine: OutboundEngine,
    supervisor: ConnectionSupervisor,
}

impl<F, R, P, C> TransferService<F, R, P, C>
where
    F: FileStore + Clone,
    R: RecordStore,
    P: ConfigPort,
    C: Clock + Clone,
{
    pub fn new(files: F, records: R, config: P, clock: C, settings: Settings) -> Self {
        let shared = Arc::new(SharedLink::new(settings.max_upload_units));
        Self {
            shared,
            engine: OutboundEngine::new(OutboundSettings::from(&settings)),
            supervisor: ConnectionSupervisor::new(&settings),
            dispatcher: CommandDispatcher::new(files, records, config, clock, settings),
        }
    }
}

impl<F, R, P, C> TransferService<F, R, P, C>
where
    F: FileStore,
    R: RecordStore,
    P: ConfigPort,
    C: Clock,
{
    /// Handle for the BLE stack's callback context.
    pub fn callbacks(&self) -> LinkCallbacks {
        LinkCallbacks::new(Arc::clone(&self.shared))
    }

    // ── Per-iteration step ────────────────────────────────────

    /// Supervisor, then the active transfer, then at most one command.
    pub fn poll(&mut self, link: &mut impl Link, sink: &mut impl EventSink) {
        let events = self
            .supervisor
            .poll(&self.shared, &mut self.engine, self.dispatcher.clock());
        for event in events {
            match event {
                SupervisorEvent::LinkUp { mtu } => sink.emit(&TransferEvent::LinkUp { mtu }),
                SupervisorEvent::LinkLost { aborted } => {
                    if let Some(outcome) = aborted {
                        self.finish(outcome, sink);
                    }
                    sink.emit(&TransferEvent::LinkLost);
                }
                SupervisorEvent::UploadAbandoned { received, expected } => {
                    sink.emit(&TransferEvent::UploadAbandoned { received, expected })
                }
            }
        }

        if let Some(outcome) = self
            .engine
            .poll(&self.shared, link, self.dispatcher.clock())
        {
            self.finish(outcome, sink);
        }

        if self.engine.is_active() || self.shared.is_busy() {
            return;
        }
        if let Some(cmd) = self.shared.take_command() {
            self.execute(cmd, link, sink);
        }
    }

    fn execute(&mut self, cmd: PendingCommand, link: &mut impl Link, sink: &mut impl EventSink) {
        sink.emit(&TransferEvent::CommandReceived {
            endpoint: cmd.endpoint,
            command: cmd.command,
        });
        let response = self.dispatcher.dispatch(&cmd);
        if response.config_applied {
            sink.emit(&TransferEvent::ConfigApplied);
        }
        if !self.shared.is_connected() {
            warn!("Service: peer gone, response to 0x{:02x} dropped", cmd.command);
            return;
        }

        let endpoint = response.endpoint;
        let bytes = response.bytes.len();
        match self.engine.start(
            &self.shared,
            &*link,
            endpoint,
            cmd.connection,
            response.bytes,
            response.on_complete,
        ) {
            Ok(units) => sink.emit(&TransferEvent::TransferStarted {
                endpoint,
                units,
                bytes,
            }),
            Err(error) => {
                warn!("Service: response not started: {}", error);
                sink.emit(&TransferEvent::TransferFailed { endpoint, error });
            }
        }
    }

    fn finish(&mut self, outcome: TransferOutcome, sink: &mut impl EventSink) {
        match outcome {
            TransferOutcome::Completed {
                endpoint,
                units,
                bytes,
                on_complete,
            } => {
                if let Some(delta) = on_complete {
                    match self.dispatcher.index().apply(delta) {
                        Ok(index) => info!(
                            "Service: delivery confirmed, {}/{} transmitted",
                            index.transmitted, index.measured
                        ),
                        Err(e) => warn!("Service: could not credit delivery: {}", e),
                    }
                }
                sink.emit(&TransferEvent::TransferCompleted {
                    endpoint,
                    units,
                    bytes,
                });
            }
            TransferOutcome::Failed { endpoint, error } => {
                sink.emit(&TransferEvent::TransferFailed { endpoint, error });
            }
        }
    }

    // ── Storage-side entry points ─────────────────────────────

    /// Append one record per reading and credit them to `measured`.
    pub fn record_measurements(
        &mut self,
        readings: &[SensorReading],
        sink: &mut impl EventSink,
    ) -> Result<ProgressIndex, StorageError> {
        let timestamp = self.dispatcher.clock().current_time().unwrap_or_else(|| {
            warn!("Service: clock not set, stamping records with the epoch");
            Timestamp::from_unix_secs(0)
        });

        let mut stored = 0u32;
        let mut failure = None;
        for reading in readings {
            let record = Record::numeric(&timestamp, &reading.id, reading.value);
            if let Err(e) = self.dispatcher.records_mut().store_record(&record) {
                warn!("Service: storing reading {} failed: {}", reading.id, e);
                failure = Some(e);
                break;
            }
            stored += 1;
        }

        let index = if stored > 0 {
            let index = self.dispatcher.index().apply_delta(i64::from(stored), 0)?;
            sink.emit(&TransferEvent::MeasurementsStored {
                count: stored,
                measured: index.measured,
            });
            index
        } else {
            self.dispatcher.index().load()?
        };
        match failure {
            Some(e) => Err(e),
            None => Ok(index),
        }
    }

    /// Reconcile the index with the records actually on the card.
    pub fn startup_check(
        &mut self,
        sink: &mut impl EventSink,
    ) -> Result<Option<Repair>, StorageError> {
        let count = self.dispatcher.records().record_count()?;
        let repair = self.dispatcher.index().check(count)?;
        match &repair {
            Some(r) => sink.emit(&TransferEvent::IndexRepaired {
                before: r.before,
                after: r.after,
            }),
            None => info!("Service: index consistent ({} records)", count),
        }
        Ok(repair)
    }

    // ── Queries ───────────────────────────────────────────────

    /// Anything in flight that a sleep would cut short.
    pub fn is_busy(&self) -> bool {
        self.engine.is_active()
            || self.shared.is_busy()
            || self.shared.has_command()
            || self.shared.with_upload(|r| r.is_active())
    }

    pub fn link_state(&self) -> LinkState {
        self.supervisor.state(&self.shared)
    }

    pub fn progress(&self) -> Result<ProgressIndex, StorageError> {
        self.dispatcher.index().load()
    }

    pub fn shared(&self) -> &Arc<SharedLink> {
        &self.shared
    }

    /// Drop the active response, e.g. before deep sleep.
    pub fn abort_transfer(&mut self, sink: &mut impl EventSink) {
        if let Some(outcome) = self.engine.abort(&self.shared, TransferError::LinkLost) {
            self.finish(outcome, sink);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::measurements::CsvRecordStore;
    use crate::adapters::sd_card::SdCardStore;
    use crate::adapters::time::SimClock;
    use crate::app::commands::Endpoint;
    use crate::app::ports::{ConfigError, ConnectionId, Delivery};
    use crate::config::DeviceConfig;
    use crate::error::LinkError;
    use crate::index::INDEX_PATH;

    struct NoConfig;

    impl ConfigPort for NoConfig {
        fn apply(&mut self, _: &DeviceConfig) -> Result<(), ConfigError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events(Vec<TransferEvent>);

    impl EventSink for Events {
        fn emit(&mut self, event: &TransferEvent) {
            self.0.push(event.clone());
        }
    }

    /// Confirms every indication before `send` returns.
    struct EagerLink {
        callbacks: LinkCallbacks,
        sent: usize,
    }

    impl Link for EagerLink {
        fn negotiated_unit_size(&self) -> u16 {
            517
        }
        fn send(&mut self, _: Endpoint, _: ConnectionId, _: &[u8]) -> Result<Delivery, LinkError> {
            self.sent += 1;
            self.callbacks.on_indication_status(true);
            Ok(Delivery::AwaitAck)
        }
    }

    type Service = TransferService<SdCardStore, CsvRecordStore<SdCardStore>, NoConfig, SimClock>;

    fn service() -> (SdCardStore, SimClock, Service) {
        let sd = SdCardStore::simulated();
        let clock = SimClock::new();
        let svc = TransferService::new(
            sd.clone(),
            CsvRecordStore::new(sd.clone()),
            NoConfig,
            clock.clone(),
            Settings::default(),
        );
        (sd, clock, svc)
    }

    #[test]
    fn answers_total_count() {
        let (sd, _, mut svc) = service();
        sd.write(INDEX_PATH, b"measured,transmitted_measured\n7,2\n").unwrap();
        let cb = svc.callbacks();
        let mut link = EagerLink {
            callbacks: cb.clone(),
            sent: 0,
        };
        let mut events = Events::default();

        cb.on_connect(1);
        cb.on_write(Endpoint::Records, 1, b"\x00");
        for _ in 0..4 {
            svc.poll(&mut link, &mut events);
        }
        assert_eq!(link.sent, 1);
        assert!(events.0.contains(&TransferEvent::TransferCompleted {
            endpoint: Endpoint::Records,
            units: 1,
            bytes: 2,
        }));
        assert!(!svc.is_busy());
    }

    #[test]
    fn records_measurements_and_counts_them() {
        let (_, clock, mut svc) = service();
        clock.set_wall(1_700_000_000);
        let mut events = Events::default();
        let readings = [
            SensorReading {
                id: heapless::String::try_from("01").unwrap(),
                value: 1.0,
            },
            SensorReading {
                id: heapless::String::try_from("02").unwrap(),
                value: 2.0,
            },
        ];
        let index = svc.record_measurements(&readings, &mut events).unwrap();
        assert_eq!(index.measured, 2);
        assert_eq!(
            events.0,
            vec![TransferEvent::MeasurementsStored {
                count: 2,
                measured: 2
            }]
        );
        assert_eq!(svc.startup_check(&mut events).unwrap(), None);
    }

    #[test]
    fn startup_check_repairs_drifted_index() {
        let (sd, _, mut svc) = service();
        sd.write(INDEX_PATH, b"measured,transmitted_measured\n9,9\n").unwrap();
        let mut events = Events::default();
        let repair = svc.startup_check(&mut events).unwrap().unwrap();
        assert_eq!(repair.after, ProgressIndex::default());
        assert!(matches!(events.0[0], TransferEvent::IndexRepaired { .. }));
    }
}
