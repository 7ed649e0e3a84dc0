//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                   |
//! |----------------|--------------------|-------------------------------|
//! | `ble`          | Link               | Bluedroid GATT server         |
//! | `device_id`    |                    | eFuse MAC, NVS identity blob  |
//! | `live_config`  | ConfigPort         | running configuration + NVS   |
//! | `log_sink`     | EventSink          | Serial log output             |
//! | `measurements` | RecordStore        | CSV data file on the SD card  |
//! | `nvs`          | StoragePort        | NVS / in-memory store         |
//! | `sd_card`      | FileStore          | FAT volume via VFS            |
//! | `time`         | Clock              | ESP32 system timer, RTC       |

pub mod ble;
pub mod device_id;
pub mod live_config;
pub mod log_sink;
pub mod measurements;
pub mod nvs;
pub mod sd_card;
pub mod time;
pub(super) mod utils;
