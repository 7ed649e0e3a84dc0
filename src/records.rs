//! Stored measurement records.
//!
//! A record is one sensor reading at one instant. On the SD card it is a
//! fixed-length CSV line; over BLE it is a JSON object inside the array that
//! follows a range-query header.

use core::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// CSV header of the measurement data file.
pub const CSV_HEADER: &str = "timestamp,id,lat,lng,nvalue,svalue";

/// Every data line is padded with spaces to this length, `\n` included.
pub const RECORD_BYTES: usize = 96;

/// One stored measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: String,
    /// Sensor channel id from the config ("01", "02", ...)
    pub id: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Numeric value
    pub nvalue: Option<f64>,
    /// String value, empty for numeric sensors
    pub svalue: String,
}

impl Record {
    /// A numeric reading without position.
    pub fn numeric(timestamp: &Timestamp, id: &str, value: f64) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            id: id.into(),
            nvalue: Some(value),
            ..Self::default()
        }
    }

    /// Render as one fixed-length CSV line (space padded, `\n` terminated).
    ///
    /// Overlong lines are cut at [`RECORD_BYTES`] so record offsets stay
    /// computable from the file size.
    pub fn to_csv_line(&self) -> String {
        let opt = |v: Option<f64>| v.map(|v| format!("{v:.4}")).unwrap_or_default();
        let mut line = format!(
            "{},{},{},{},{},{}",
            self.timestamp,
            self.id,
            opt(self.lat),
            opt(self.lng),
            opt(self.nvalue),
            self.svalue
        );
        if line.len() > RECORD_BYTES - 1 {
            let mut cut = RECORD_BYTES - 1;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        while line.len() < RECORD_BYTES - 1 {
            line.push(' ');
        }
        line.push('\n');
        line
    }

    /// Parse one CSV data line. Missing or non-numeric cells read as `None`.
    pub fn from_csv_line(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.is_empty() {
            return None;
        }
        let mut cells = line.splitn(6, ',');
        let mut next = || cells.next().unwrap_or("").trim();
        let num = |s: &str| s.parse::<f64>().ok();
        let timestamp = next().to_string();
        let id = next().to_string();
        let lat = num(next());
        let lng = num(next());
        let nvalue = num(next());
        let svalue = next().to_string();
        Some(Self {
            timestamp,
            id,
            lat,
            lng,
            nvalue,
            svalue,
        })
    }
}

/// A reading handed in by the sampling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: heapless::String<8>,
    pub value: f64,
}

/// Wall-clock instant, UTC, second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Seconds since the Unix epoch. Out-of-range values read as the epoch.
    pub fn from_unix_secs(secs: u64) -> Self {
        let instant = i64::try_from(secs)
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .unwrap_or(DateTime::UNIX_EPOCH);
        Self(instant)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}
