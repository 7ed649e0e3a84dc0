//! Device identity: the advertised BLE name.
//!
//! Loggers advertise as `osbk-…`. A name uploaded with `config.json` and
//! persisted in NVS wins if it carries that prefix; otherwise the name is
//! derived from the factory MAC: `osbk-HER-` plus all six bytes in
//! lowercase hex (e.g. `osbk-HER-deadbeefcafe`).

use core::fmt::Write;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::nvs::SETTINGS_NAMESPACE;
use super::utils::is_printable_ascii;
use crate::app::ports::{StorageError, StoragePort};
use crate::config::MAX_DEVICE_NAME_LEN;

pub const NAME_PREFIX: &str = "osbk-";
const DERIVED_PREFIX: &str = "osbk-HER-";
const IDENTITY_KEY: &str = "identity";

pub type DeviceName = heapless::String<32>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// What NVS keeps about this unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: DeviceName,
}

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// `osbk-HER-xxxxxxxxxxxx`
pub fn derived_name(mac: &MacAddress) -> DeviceName {
    let mut name = DeviceName::new();
    let _ = name.push_str(DERIVED_PREFIX);
    for b in mac {
        let _ = write!(name, "{:02x}", b);
    }
    name
}

/// Whether `name` may be advertised as is.
pub fn is_valid_name(name: &str) -> bool {
    name.starts_with(NAME_PREFIX)
        && name.len() <= MAX_DEVICE_NAME_LEN
        && is_printable_ascii(name)
}

/// The stored name when valid, the MAC-derived one otherwise.
pub fn resolve_name(stored: Option<&str>, mac: &MacAddress) -> DeviceName {
    match stored {
        Some(name) if is_valid_name(name) => {
            let mut out = DeviceName::new();
            let _ = out.push_str(name);
            out
        }
        Some(name) => {
            warn!("DeviceId: stored name '{}' not usable, deriving from MAC", name);
            derived_name(mac)
        }
        None => derived_name(mac),
    }
}

pub fn load_identity(nvs: &impl StoragePort) -> Option<DeviceIdentity> {
    let mut buf = [0u8; 64];
    let len = nvs.read(SETTINGS_NAMESPACE, IDENTITY_KEY, &mut buf).ok()?;
    postcard::from_bytes(&buf[..len]).ok()
}

/// Name to advertise at boot.
pub fn device_name(nvs: &impl StoragePort, mac: &MacAddress) -> DeviceName {
    let identity = load_identity(nvs);
    let name = resolve_name(identity.as_ref().map(|i| i.name.as_str()), mac);
    info!("DeviceId: advertising as '{}'", name);
    name
}

/// Persist `name` for the next boot.
pub fn store_name(nvs: &mut impl StoragePort, name: &str) -> Result<(), StorageError> {
    let mut identity = DeviceIdentity::default();
    identity
        .name
        .push_str(name)
        .map_err(|_| StorageError::InvalidPath)?;
    let bytes = postcard::to_allocvec(&identity).map_err(|_| StorageError::IoError)?;
    nvs.write(SETTINGS_NAMESPACE, IDENTITY_KEY, &bytes)
}
