//! Mock adapters for integration tests.
//!
//! Every mock records what the transfer core did to it so tests can assert
//! on the full history without a radio or an SD card.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use datalogger::adapters::measurements::CsvRecordStore;
use datalogger::app::commands::Endpoint;
use datalogger::app::events::TransferEvent;
use datalogger::app::ports::{
    Clock, ConfigError, ConfigPort, ConnectionId, Delivery, EventSink, FileStore, Link,
    RecordStore, StorageError,
};
use datalogger::app::service::TransferService;
use datalogger::config::{DeviceConfig, Settings};
use datalogger::error::{LinkError, TransferError};
use datalogger::index::{INDEX_PATH, ProgressIndex};
use datalogger::records::{Record, Timestamp};
use datalogger::transfer::{LinkCallbacks, TransferPacket};

// ── MemFiles ──────────────────────────────────────────────────

/// In-memory card. Clones share the same files.
#[derive(Clone, Default)]
pub struct MemFiles {
    files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
    unavailable: Rc<Cell<bool>>,
}

impl MemFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a pulled card: every operation fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.files
            .borrow()
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.get() {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl FileStore for MemFiles {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.check()?;
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let data = self.read(path)?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        self.files.borrow_mut().insert(path.into(), data.to_vec());
        Ok(())
    }

    fn append(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        self.files
            .borrow_mut()
            .entry(path.into())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        !self.unavailable.get() && self.files.borrow().contains_key(path)
    }

    fn size(&self, path: &str) -> Result<u64, StorageError> {
        self.read(path).map(|d| d.len() as u64)
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.check()?;
        self.files
            .borrow_mut()
            .remove(path)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn create_dir_all(&self, _path: &str) -> Result<(), StorageError> {
        self.check()
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.check()?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .files
            .borrow()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(String::from)
            .collect())
    }
}

// ── MockClock ─────────────────────────────────────────────────

/// Manually advanced clock; `delay_ms` moves time instead of sleeping.
#[derive(Clone, Default)]
pub struct MockClock {
    now: Rc<Cell<u64>>,
}

impl MockClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&self, ms: u32) {
        self.advance(u64::from(ms));
    }

    fn current_time(&self) -> Option<Timestamp> {
        Some(Timestamp::from_unix_secs(1_700_000_000 + self.now.get() / 1000))
    }
}

// ── MockLink ──────────────────────────────────────────────────

/// How the mock peer answers indications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Confirmed from inside `send`.
    Eager,
    /// Only when the test calls [`MockLink::confirm`].
    Manual,
}

pub struct MockLink {
    pub callbacks: LinkCallbacks,
    pub mtu: u16,
    pub ack: AckMode,
    pub script: VecDeque<Result<Delivery, LinkError>>,
    pub sent: Vec<(Endpoint, Vec<u8>)>,
}

impl MockLink {
    pub fn new(callbacks: LinkCallbacks) -> Self {
        Self {
            callbacks,
            mtu: 517,
            ack: AckMode::Eager,
            script: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    pub fn confirm(&self) {
        self.callbacks.on_indication_status(true);
    }

    /// Payloads of every response sent so far, reassembled.
    pub fn responses(&self) -> Vec<(Endpoint, Vec<u8>)> {
        let mut out: Vec<(Endpoint, Vec<u8>)> = Vec::new();
        for (endpoint, frame) in &self.sent {
            let packet = TransferPacket::decode(frame).expect("frame decodes");
            if packet.chunk_index == 0 {
                out.push((*endpoint, Vec::new()));
            }
            if let Some((_, body)) = out.last_mut() {
                body.extend_from_slice(&packet.payload);
            }
        }
        out
    }

    pub fn last_response(&self) -> Vec<u8> {
        self.responses().pop().map(|(_, b)| b).unwrap_or_default()
    }

    pub fn packets(&self) -> Vec<TransferPacket> {
        self.sent
            .iter()
            .map(|(_, f)| TransferPacket::decode(f).expect("frame decodes"))
            .collect()
    }
}

impl Link for MockLink {
    fn negotiated_unit_size(&self) -> u16 {
        self.mtu
    }

    fn send(
        &mut self,
        endpoint: Endpoint,
        _connection: ConnectionId,
        frame: &[u8],
    ) -> Result<Delivery, LinkError> {
        if let Some(scripted) = self.script.pop_front() {
            if scripted.is_ok() {
                self.sent.push((endpoint, frame.to_vec()));
            }
            return scripted;
        }
        self.sent.push((endpoint, frame.to_vec()));
        if endpoint == Endpoint::Config {
            return Ok(Delivery::Sent);
        }
        if self.ack == AckMode::Eager {
            self.callbacks.on_indication_status(true);
        }
        Ok(Delivery::AwaitAck)
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<TransferEvent>,
}

impl RecordingSink {
    pub fn failures(&self) -> Vec<TransferError> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::TransferFailed { error, .. } => Some(*error),
                _ => None,
            })
            .collect()
    }

    pub fn completed(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TransferEvent::TransferCompleted { .. }))
            .count()
    }

    pub fn contains(&self, event: &TransferEvent) -> bool {
        self.events.contains(event)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &TransferEvent) {
        self.events.push(event.clone());
    }
}

// ── MockConfigPort ────────────────────────────────────────────

/// Shares its history with the test through an `Rc`.
#[derive(Clone, Default)]
pub struct MockConfigPort {
    pub applied: Rc<RefCell<Vec<DeviceConfig>>>,
}

impl ConfigPort for MockConfigPort {
    fn apply(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        self.applied.borrow_mut().push(config.clone());
        Ok(())
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub type Service = TransferService<MemFiles, CsvRecordStore<MemFiles>, MockConfigPort, MockClock>;

/// A service wired to mocks, with a connected peer.
pub struct Rig {
    pub files: MemFiles,
    pub clock: MockClock,
    pub config: MockConfigPort,
    pub service: Service,
    pub link: MockLink,
    pub sink: RecordingSink,
}

pub const CONN: ConnectionId = 1;

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::on_card(MemFiles::new(), settings)
    }

    /// A freshly booted service over an existing card.
    pub fn on_card(files: MemFiles, settings: Settings) -> Self {
        let clock = MockClock::default();
        let config = MockConfigPort::default();
        let service = TransferService::new(
            files.clone(),
            CsvRecordStore::new(files.clone()),
            config.clone(),
            clock.clone(),
            settings,
        );
        let link = MockLink::new(service.callbacks());
        let mut rig = Self {
            files,
            clock,
            config,
            service,
            link,
            sink: RecordingSink::default(),
        };
        rig.connect();
        rig
    }

    pub fn connect(&mut self) {
        self.link.callbacks.on_connect(CONN);
        self.link.callbacks.on_mtu(self.link.mtu);
        self.poll();
    }

    /// Append `n` records and set the index to match.
    pub fn seed(&mut self, n: u32, transmitted: u32) {
        let mut store = CsvRecordStore::new(self.files.clone());
        let ts = Timestamp::from_unix_secs(1_700_000_000);
        for i in 0..n {
            store
                .store_record(&Record::numeric(&ts, "01", f64::from(i)))
                .expect("record stored");
        }
        self.set_index(n, transmitted);
    }

    pub fn set_index(&self, measured: u32, transmitted: u32) {
        let csv = format!("measured,transmitted_measured\n{measured},{transmitted}\n");
        self.files
            .write(INDEX_PATH, csv.as_bytes())
            .expect("index written");
    }

    pub fn index(&self) -> ProgressIndex {
        self.service.progress().expect("index readable")
    }

    pub fn write(&self, endpoint: Endpoint, data: &[u8]) {
        self.link.callbacks.on_write(endpoint, CONN, data);
    }

    pub fn poll(&mut self) {
        self.service.poll(&mut self.link, &mut self.sink);
    }

    /// Poll until nothing is in flight, bounded.
    pub fn settle(&mut self) {
        for _ in 0..10_000 {
            self.poll();
            if !self.service.is_busy() {
                return;
            }
        }
        panic!("service never settled");
    }

    /// Send a command and run it to completion.
    pub fn request(&mut self, endpoint: Endpoint, data: &[u8]) -> Vec<u8> {
        self.write(endpoint, data);
        self.settle();
        self.link.last_response()
    }
}

/// Split `message` into encoded upload units of `unit` payload bytes.
pub fn upload_frames(message: &[u8], unit: usize) -> Vec<Vec<u8>> {
    let total = message.len().div_ceil(unit) as u16;
    message
        .chunks(unit)
        .enumerate()
        .map(|(i, chunk)| {
            TransferPacket::chunk(total, i as u16, chunk)
                .expect("chunk fits")
                .to_vec()
        })
        .collect()
}
