//! Live configuration adapter.
//!
//! Implements [`ConfigPort`]: keeps the configuration the sampling loop
//! reads from, and persists the BLE name to NVS since the advertising name
//! is fixed until the next boot.

use log::{info, warn};

use super::device_id::{is_valid_name, store_name};
use crate::app::ports::{ConfigError, ConfigPort, StoragePort};
use crate::config::DeviceConfig;

pub struct LiveConfig<S: StoragePort> {
    nvs: S,
    current: DeviceConfig,
    restart_required: bool,
}

impl<S: StoragePort> LiveConfig<S> {
    pub fn new(nvs: S, initial: DeviceConfig) -> Self {
        Self {
            nvs,
            current: initial,
            restart_required: false,
        }
    }

    pub fn current(&self) -> &DeviceConfig {
        &self.current
    }

    pub fn sample_interval_ms(&self) -> u32 {
        self.current.interface_mcu.sample_interval_ms
    }

    /// Set once an applied config changed something only a reboot picks up.
    pub fn restart_required(&self) -> bool {
        self.restart_required
    }

    pub fn storage(&self) -> &S {
        &self.nvs
    }
}

impl<S: StoragePort> ConfigPort for LiveConfig<S> {
    fn apply(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let name = config.main_mcu.bluetooth_name.as_str();
        if !name.is_empty() && name != self.current.main_mcu.bluetooth_name {
            if is_valid_name(name) {
                store_name(&mut self.nvs, name).map_err(|_| ConfigError::IoError)?;
                self.restart_required = true;
                info!("LiveConfig: BLE name '{}' takes effect after restart", name);
            } else {
                warn!("LiveConfig: BLE name '{}' lacks the osbk- prefix, ignored", name);
            }
        }

        if config.interface_mcu.sample_interval_ms != self.current.interface_mcu.sample_interval_ms {
            info!(
                "LiveConfig: sample interval {} -> {} ms",
                self.current.interface_mcu.sample_interval_ms,
                config.interface_mcu.sample_interval_ms
            );
        }
        self.current = config.clone();
        Ok(())
    }
}
