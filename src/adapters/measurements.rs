//! Measurement log on the SD card.
//!
//! Implements [`RecordStore`] over a CSV file of fixed-length lines, so the
//! record count and any record's byte offset follow from the file size:
//!
//! ```text
//! offset(i) = len(header) + i * RECORD_BYTES
//! count     = (size - len(header)) / RECORD_BYTES
//! ```

use log::{debug, warn};

use crate::app::ports::{FileStore, RecordStore, StorageError};
use crate::records::{CSV_HEADER, RECORD_BYTES, Record};

pub const DATA_PATH: &str = "/measurements/datM.csv";

pub struct CsvRecordStore<F: FileStore> {
    files: F,
    path: &'static str,
}

impl<F: FileStore> CsvRecordStore<F> {
    pub fn new(files: F) -> Self {
        Self {
            files,
            path: DATA_PATH,
        }
    }

    fn header_len() -> u64 {
        CSV_HEADER.len() as u64 + 1
    }
}

impl<F: FileStore> RecordStore for CsvRecordStore<F> {
    fn store_record(&mut self, record: &Record) -> Result<(), StorageError> {
        if !self.files.exists(self.path) {
            debug!("Records: creating {}", self.path);
            self.files
                .append(self.path, format!("{CSV_HEADER}\n").as_bytes())?;
        }
        let line = record.to_csv_line();
        if line.len() != RECORD_BYTES {
            warn!("Records: line of {} bytes for id {}", line.len(), record.id);
        }
        self.files.append(self.path, line.as_bytes())
    }

    fn record_count(&self) -> Result<u32, StorageError> {
        match self.files.size(self.path) {
            Ok(size) => {
                let count = size.saturating_sub(Self::header_len()) / RECORD_BYTES as u64;
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            }
            Err(StorageError::NotFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn load_records(&self, start: u32, end: u32) -> Result<Vec<Record>, StorageError> {
        let count = self.record_count()?;
        if count == 0 || start > end || start >= count {
            return Ok(Vec::new());
        }
        let end = end.min(count - 1);
        let offset = Self::header_len() + u64::from(start) * RECORD_BYTES as u64;
        let len = (end - start + 1) as usize * RECORD_BYTES;
        let bytes = self.files.read_range(self.path, offset, len)?;
        Ok(bytes
            .chunks(RECORD_BYTES)
            .filter_map(|line| Record::from_csv_line(&String::from_utf8_lossy(line)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sd_card::SdCardStore;
    use crate::records::Timestamp;

    fn store_with(n: u32) -> CsvRecordStore<SdCardStore> {
        let mut store = CsvRecordStore::new(SdCardStore::simulated());
        let ts = Timestamp::from_unix_secs(1_700_000_000);
        for i in 0..n {
            store
                .store_record(&Record::numeric(&ts, "01", f64::from(i)))
                .unwrap();
        }
        store
    }

    #[test]
    fn missing_file_counts_zero() {
        let store = CsvRecordStore::new(SdCardStore::simulated());
        assert_eq!(store.record_count(), Ok(0));
        assert!(store.load_records(0, 10).unwrap().is_empty());
    }

    #[test]
    fn count_follows_file_size() {
        assert_eq!(store_with(7).record_count(), Ok(7));
    }

    #[test]
    fn loads_inclusive_range_clipped_to_count() {
        let store = store_with(5);
        let recs = store.load_records(3, 99).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].nvalue, Some(3.0));
        assert_eq!(recs[1].nvalue, Some(4.0));
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(store_with(5).load_records(4, 2).unwrap().is_empty());
    }
}
