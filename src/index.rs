//! Resumable progress index.
//!
//! Two counters persisted on the SD card as a tiny CSV file:
//!
//! ```text
//! /measurements/index.csv
//! ┌───────────────────────────────┐
//! │ measured,transmitted_measured │
//! │ 1234,1200                     │
//! └───────────────────────────────┘
//! ```
//!
//! `measured` counts records appended to the data file, `transmitted` how
//! many of them a peer has been sent. `transmitted <= measured` always; a
//! violation is repaired by resetting `transmitted` to zero, which favours
//! re-delivery over silently skipping records.

use log::{debug, error, info, warn};

use crate::app::ports::{Clock, FileStore, StorageError};
use crate::config::Settings;

pub const INDEX_PATH: &str = "/measurements/index.csv";
pub const INDEX_HEADER: &str = "measured,transmitted_measured";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressIndex {
    pub measured: u32,
    pub transmitted: u32,
}

impl ProgressIndex {
    /// Records not yet sent to any peer.
    pub fn pending(&self) -> u32 {
        self.measured.saturating_sub(self.transmitted)
    }

    pub fn is_consistent(&self) -> bool {
        self.transmitted <= self.measured
    }

    fn to_csv(self) -> String {
        format!("{INDEX_HEADER}\n{},{}\n", self.measured, self.transmitted)
    }

    /// Parse the data line. Accepts files with or without the header.
    fn from_csv(text: &str) -> Option<Self> {
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with("measured"))?;
        let (m, t) = line.split_once(',')?;
        Some(Self {
            measured: m.trim().parse().ok()?,
            transmitted: t.trim().parse().ok()?,
        })
    }
}

/// A signed change to both counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub measured: i64,
    pub transmitted: i64,
}

impl ProgressDelta {
    pub const fn transmitted(n: i64) -> Self {
        Self {
            measured: 0,
            transmitted: n,
        }
    }

    pub const fn measured(n: i64) -> Self {
        Self {
            measured: n,
            transmitted: 0,
        }
    }
}

/// Report of a consistency check that changed something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repair {
    pub before: ProgressIndex,
    pub after: ProgressIndex,
}

/// Owns the index file. All mutation goes through [`save`](Self::save).
pub struct ProgressIndexStore<F: FileStore, C: Clock> {
    files: F,
    clock: C,
    read_retries: u8,
    retry_delay_ms: u32,
}

impl<F: FileStore, C: Clock> ProgressIndexStore<F, C> {
    pub fn new(files: F, clock: C, settings: &Settings) -> Self {
        Self {
            files,
            clock,
            read_retries: settings.index_read_retries,
            retry_delay_ms: settings.index_retry_delay_ms,
        }
    }

    /// Current counters, with `transmitted > measured` healed in memory.
    ///
    /// A missing file is created with zeros. A zero `measured` is re-read a
    /// few times since the card may still be settling after mount.
    pub fn load(&self) -> Result<ProgressIndex, StorageError> {
        let mut index = self.read_persisted()?;
        if !index.is_consistent() {
            warn!(
                "Index: transmitted {} > measured {}, resetting transmitted",
                index.transmitted, index.measured
            );
            index.transmitted = 0;
        }
        Ok(index)
    }

    /// Persist `index`. A zero `measured` is never written so an unmounted
    /// or half-initialised card cannot wipe real progress.
    pub fn save(&self, index: ProgressIndex) -> Result<(), StorageError> {
        if index.measured == 0 {
            debug!("Index: not saving empty index");
            return Ok(());
        }
        self.write(index)
    }

    /// Load, add both deltas (clamped at zero), save.
    pub fn apply_delta(
        &self,
        measured_delta: i64,
        transmitted_delta: i64,
    ) -> Result<ProgressIndex, StorageError> {
        let current = self.load()?;
        let clamp = |v: u32, d: i64| (i64::from(v) + d).clamp(0, i64::from(u32::MAX)) as u32;
        let mut next = ProgressIndex {
            measured: clamp(current.measured, measured_delta),
            transmitted: clamp(current.transmitted, transmitted_delta),
        };
        if !next.is_consistent() {
            warn!(
                "Index: delta left transmitted {} > measured {}, resetting",
                next.transmitted, next.measured
            );
            next.transmitted = 0;
        }
        self.save(next)?;
        Ok(next)
    }

    pub fn apply(&self, delta: ProgressDelta) -> Result<ProgressIndex, StorageError> {
        self.apply_delta(delta.measured, delta.transmitted)
    }

    /// Compare against the record count found on the medium.
    ///
    /// Returns `true` when nothing needed fixing.
    pub fn validate(&self, actual_record_count: u32) -> Result<bool, StorageError> {
        Ok(self.check(actual_record_count)?.is_none())
    }

    /// Like [`validate`](Self::validate), returning what was repaired.
    pub fn check(&self, actual_record_count: u32) -> Result<Option<Repair>, StorageError> {
        let before = self.read_persisted()?;
        let mut after = before;
        if !after.is_consistent() {
            warn!(
                "Index: integrity violation, transmitted {} > measured {}",
                after.transmitted, after.measured
            );
            after.transmitted = 0;
        }
        if after.measured != actual_record_count {
            warn!(
                "Index: measured {} but medium holds {} records, resending all",
                after.measured, actual_record_count
            );
            after.measured = actual_record_count;
            after.transmitted = 0;
        }
        if after == before {
            return Ok(None);
        }
        // Written even when zero: the medium really is empty.
        self.write(after)?;
        info!(
            "Index: repaired {}/{} -> {}/{}",
            before.measured, before.transmitted, after.measured, after.transmitted
        );
        Ok(Some(Repair { before, after }))
    }

    fn read_persisted(&self) -> Result<ProgressIndex, StorageError> {
        if !self.files.exists(INDEX_PATH) {
            info!("Index: not found, initialising");
            let zero = ProgressIndex::default();
            self.write(zero)?;
            return Ok(zero);
        }
        let mut attempt = 0;
        loop {
            let index = self.read_once()?;
            if index.measured > 0 || attempt >= self.read_retries {
                return Ok(index);
            }
            attempt += 1;
            debug!("Index: measured is 0, re-reading ({attempt})");
            self.clock.delay_ms(self.retry_delay_ms);
        }
    }

    fn read_once(&self) -> Result<ProgressIndex, StorageError> {
        let bytes = self.files.read(INDEX_PATH)?;
        let text = core::str::from_utf8(&bytes).unwrap_or_default();
        Ok(ProgressIndex::from_csv(text).unwrap_or_else(|| {
            error!("Index: unreadable contents, treating as empty");
            ProgressIndex::default()
        }))
    }

    fn write(&self, index: ProgressIndex) -> Result<(), StorageError> {
        self.files.write(INDEX_PATH, index.to_csv().as_bytes())
    }
}

// ── Tests ────────────────────────────────────────────────────
