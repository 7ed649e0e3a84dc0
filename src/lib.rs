//! Data logger firmware library.
//!
//! Chunked BLE transfer of stored measurements, configuration upload and
//! the resumable progress index. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module, so the library builds
//! and tests on the host.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod index;
pub mod records;
pub mod transfer;

pub mod adapters;
pub mod pins;
