//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one flow of the transfer
//! core against mock adapters. All tests run on the host with no radio or
//! SD card.

mod config_upload_tests;
mod index_recovery_tests;
mod mocks;
mod transfer_flow_tests;
