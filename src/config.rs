//! Configuration.
//!
//! Two layers:
//!
//! - [`Settings`]: transfer-layer tunables (timeouts, retry bounds, limits).
//!   Compiled-in defaults match the values existing companion apps expect.
//! - [`DeviceConfig`]: the `config.json` document uploaded over BLE and kept
//!   on the SD card under `/config`. Parsed with serde, validated before it
//!   is applied.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Maximum sensor parameters a config may declare.
pub const MAX_PARAMETERS: usize = 10;
/// Maximum python helper scripts referenced by a config.
pub const MAX_PYTHON_FILES: usize = 5;
/// Maximum sensor interfaces on the interface MCU.
pub const MAX_SENSOR_INTERFACES: usize = 2;
/// Longest BLE device name we advertise.
pub const MAX_DEVICE_NAME_LEN: usize = 29;

/// Transfer-layer tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // --- Outbound ---
    /// Time allowed for one indication to be confirmed (milliseconds)
    pub ack_timeout_ms: u32,
    /// Attempts per unit while the stack reports congestion
    pub send_retries: u8,
    /// Gap between send attempts (milliseconds)
    pub send_retry_backoff_ms: u32,
    /// Credit `transmitted` only once the whole response was acknowledged
    pub advance_on_delivery: bool,

    // --- Inbound ---
    /// Upload watchdog: max silence between chunks (milliseconds)
    pub upload_timeout_ms: u32,
    /// Largest `total_units` accepted for one upload
    pub max_upload_units: u16,

    // --- Progress index ---
    /// Re-reads when the index reports zero records
    pub index_read_retries: u8,
    /// Delay between index re-reads (milliseconds)
    pub index_retry_delay_ms: u32,

    // --- Link ---
    /// ATT MTU requested from the peer
    pub target_mtu: u16,
    /// VFS mount point of the SD card
    pub sd_mount_point: heapless::String<32>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut sd_mount_point = heapless::String::new();
        // "/sdcard" always fits in 32 bytes.
        let _ = sd_mount_point.push_str("/sdcard");
        Self {
            ack_timeout_ms: 5000,
            send_retries: 15,
            send_retry_backoff_ms: 60,
            advance_on_delivery: false,

            upload_timeout_ms: 5000,
            max_upload_units: 256,

            index_read_retries: 5,
            index_retry_delay_ms: 100,

            target_mtu: 517,
            sd_mount_point,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(500..=60_000).contains(&self.ack_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "ack_timeout_ms must be 500–60000",
            ));
        }
        if self.send_retries == 0 {
            return Err(ConfigError::ValidationFailed("send_retries must be >= 1"));
        }
        if !(500..=60_000).contains(&self.upload_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "upload_timeout_ms must be 500–60000",
            ));
        }
        if self.max_upload_units == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_upload_units must be >= 1",
            ));
        }
        if !(23..=517).contains(&self.target_mtu) {
            return Err(ConfigError::ValidationFailed("target_mtu must be 23–517"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// config.json
// ---------------------------------------------------------------------------

/// The device configuration document (`/config/config.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfig {
    pub main_mcu: MainMcuConfig,
    pub interface_mcu: InterfaceMcuConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MainMcuConfig {
    pub datanode_address: String,
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub item_uuid: String,
    pub item_token: String,
    pub bluetooth_name: String,
    pub poweroff_threshold_ms: u32,
    pub poweroff_enable: bool,
    /// Start of the measurement window; -1 = unbounded
    pub measurement_start: i32,
    /// End of the measurement window; -1 = unbounded
    pub measurement_stop: i32,
}

impl Default for MainMcuConfig {
    fn default() -> Self {
        Self {
            datanode_address: String::new(),
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            item_uuid: String::new(),
            item_token: String::new(),
            bluetooth_name: String::new(),
            poweroff_threshold_ms: 2000,
            poweroff_enable: false,
            measurement_start: -1,
            measurement_stop: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceMcuConfig {
    pub sensor_interfaces: Vec<String>,
    pub i2c_frequency: u32,
    pub sensor_baudrate: u32,
    pub sensor_voltage: f32,
    pub sample_interval_ms: u32,
    pub sensor_prep_ms: u32,
    pub python_file_names: Vec<String>,
    pub parameters: Vec<SensorParameter>,
}

impl Default for InterfaceMcuConfig {
    fn default() -> Self {
        Self {
            sensor_interfaces: Vec::new(),
            i2c_frequency: 100_000,
            sensor_baudrate: 19_200,
            sensor_voltage: 3.3,
            sample_interval_ms: 10_000,
            sensor_prep_ms: 0,
            python_file_names: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

/// One sensor channel declared by the config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorParameter {
    /// Two-digit channel id ("01", "02", ...)
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub unit: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub icon: String,
}

impl DeviceConfig {
    /// Parse a `config.json` document.
    ///
    /// Syntax errors map to [`ConfigError::Corrupted`]; well-formed JSON
    /// that does not describe a usable config maps to
    /// [`ConfigError::ValidationFailed`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|_| ConfigError::Corrupted)?;
        if !value.is_object() {
            return Err(ConfigError::ValidationFailed("config must be a JSON object"));
        }
        let config: Self = serde_json::from_value(value)
            .map_err(|_| ConfigError::ValidationFailed("config fields have wrong types"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let iface = &self.interface_mcu;
        if iface.parameters.len() > MAX_PARAMETERS {
            return Err(ConfigError::ValidationFailed("at most 10 parameters"));
        }
        if iface.python_file_names.len() > MAX_PYTHON_FILES {
            return Err(ConfigError::ValidationFailed("at most 5 python files"));
        }
        if iface.sensor_interfaces.len() > MAX_SENSOR_INTERFACES {
            return Err(ConfigError::ValidationFailed("at most 2 sensor interfaces"));
        }
        if iface.sample_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "sampleIntervalMs must be > 0",
            ));
        }
        if self.main_mcu.bluetooth_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(ConfigError::ValidationFailed(
                "bluetoothName longer than 29 bytes",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_sane() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.ack_timeout_ms, 5000);
        assert_eq!(s.upload_timeout_ms, 5000);
        assert_eq!(s.send_retries, 15);
        assert!(!s.advance_on_delivery);
        assert_eq!(s.sd_mount_point.as_str(), "/sdcard");
    }

    #[test]
    fn settings_serde_roundtrip_with_partial_json() {
        let s: Settings = serde_json::from_str(r#"{"ack_timeout_ms":2000}"#).unwrap();
        assert_eq!(s.ack_timeout_ms, 2000);
        assert_eq!(s.send_retries, 15);
    }

    #[test]
    fn settings_postcard_roundtrip() {
        let s = Settings::default();
        let bytes = postcard::to_allocvec(&s).unwrap();
        let back: Settings = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn rejects_zero_retries() {
        let s = Settings {
            send_retries: 0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn parses_device_config_with_defaults() {
        let json = br#"{
            "mainMcu": { "bluetoothName": "osbk-lake", "poweroffEnable": true },
            "interfaceMcu": {
                "sensorInterfaces": ["i2c"],
                "parameters": [{ "id": "01", "name": "temperature", "type": "temperature" }]
            }
        }"#;
        let cfg = DeviceConfig::from_json(json).unwrap();
        assert_eq!(cfg.main_mcu.bluetooth_name, "osbk-lake");
        assert!(cfg.main_mcu.poweroff_enable);
        assert_eq!(cfg.main_mcu.poweroff_threshold_ms, 2000);
        assert_eq!(cfg.main_mcu.measurement_start, -1);
        assert_eq!(cfg.interface_mcu.sample_interval_ms, 10_000);
        assert_eq!(cfg.interface_mcu.parameters[0].kind, "temperature");
    }

    #[test]
    fn syntax_error_is_corrupted() {
        assert_eq!(
            DeviceConfig::from_json(b"{\"mainMcu\": "),
            Err(ConfigError::Corrupted)
        );
    }

    #[test]
    fn non_object_is_invalid() {
        assert!(matches!(
            DeviceConfig::from_json(b"[1,2,3]"),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn too_many_parameters_is_invalid() {
        let mut cfg = DeviceConfig::default();
        cfg.interface_mcu.parameters = vec![SensorParameter::default(); MAX_PARAMETERS + 1];
        assert!(matches!(cfg.validate(), Err(ConfigError::ValidationFailed(_))));
    }
}
