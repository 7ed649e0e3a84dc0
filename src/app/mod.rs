//! Application core.
//!
//! The polling-side [`service::TransferService`] plus the vocabulary it
//! shares with the adapters: command identifiers, events, and the
//! **port traits** in [`ports`] that keep radio and storage out of the
//! domain, so all of it runs on the host under test.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
