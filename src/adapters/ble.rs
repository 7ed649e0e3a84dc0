//! BLE GATT adapter.
//!
//! Implements the [`Link`] port and forwards stack events to
//! [`LinkCallbacks`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid BLE GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: [`SimulatedLink`], a scriptable in-process peer
//!   for host-side tests.
//!
//! ## GATT Service Layout
//!
//! | Service / Characteristic | UUID                                    | Props          |
//! |--------------------------|-----------------------------------------|----------------|
//! | SD card service          | `00020000-83a3-449e-afeb-52e55909e63c`  |                |
//! | └ records                | `00020100-83a3-449e-afeb-52e55909e63c`  | Write+Indicate |
//! | Config service           | `00010000-83a3-449e-afeb-52e55909e63c`  |                |
//! | └ config                 | `00010100-83a3-449e-afeb-52e55909e63c`  | Write+Notify   |

use log::info;

use crate::app::commands::Endpoint;
use crate::app::ports::{ConnectionId, Delivery, Link};
use crate::error::LinkError;
use crate::transfer::LinkCallbacks;

#[cfg(target_os = "espidf")]
use log::{error, warn};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SD_SERVICE_UUID: u128 = 0x00020000_83a3_449e_afeb_52e55909e63c;
pub const SD_CHAR_UUID: u128 = 0x00020100_83a3_449e_afeb_52e55909e63c;
pub const CONFIG_SERVICE_UUID: u128 = 0x00010000_83a3_449e_afeb_52e55909e63c;
pub const CONFIG_CHAR_UUID: u128 = 0x00010100_83a3_449e_afeb_52e55909e63c;

/// Client Characteristic Configuration descriptor.
#[cfg(target_os = "espidf")]
const CCCD_UUID: u16 = 0x2902;

/// Handles per service: declaration, characteristic + value, CCCD.
#[cfg(target_os = "espidf")]
const SERVICE_HANDLES: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid GATT server
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. Handles live in atomics; the callback handle in a OnceLock.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static LINK_CALLBACKS: std::sync::OnceLock<LinkCallbacks> = std::sync::OnceLock::new();
#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU8 = AtomicU8::new(0);
#[cfg(target_os = "espidf")]
static BLE_SD_CHAR_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_CFG_CHAR_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_SETUP_STEP: AtomicU8 = AtomicU8::new(0);

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    t.uuid.uuid128 = uuid.to_le_bytes();
    t
}

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
unsafe fn create_service(gatts_if: esp_idf_svc::sys::esp_gatt_if_t, uuid: u128) {
    use esp_idf_svc::sys::*;
    let mut svc_id = esp_gatt_srvc_id_t {
        id: esp_gatt_id_t {
            uuid: uuid128_to_esp(uuid),
            inst_id: 0,
        },
        is_primary: true,
    };
    esp_ble_gatts_create_service(gatts_if, &mut svc_id, SERVICE_HANDLES);
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, prop: u32) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    esp_ble_gatts_add_char(
        svc_handle,
        &mut char_uuid,
        ESP_GATT_PERM_WRITE as esp_gatt_perm_t,
        prop as esp_gatt_char_prop_t,
        core::ptr::null_mut(),
        core::ptr::null_mut(),
    );
}

#[cfg(target_os = "espidf")]
unsafe fn add_cccd(svc_handle: u16) {
    use esp_idf_svc::sys::*;
    let mut uuid = uuid16_to_esp(CCCD_UUID);
    esp_ble_gatts_add_char_descr(
        svc_handle,
        &mut uuid,
        (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
        core::ptr::null_mut(),
        core::ptr::null_mut(),
    );
}

#[cfg(target_os = "espidf")]
unsafe fn start_advertising() {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..core::mem::zeroed()
    };
    esp_ble_gap_start_advertising(&mut adv_params);
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => {
            start_advertising();
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

/// Registration runs as a chain: each completion event adds the next
/// attribute, the SD card service first.
#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;

    let Some(callbacks) = LINK_CALLBACKS.get() else {
        return;
    };

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            BLE_GATTS_IF.store(gatts_if, AtomicOrdering::Release);
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            BLE_SETUP_STEP.store(1, AtomicOrdering::Release);
            create_service(gatts_if, SD_SERVICE_UUID);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = (*param).create.service_handle;
            BLE_SVC_HANDLE.store(svc_handle, AtomicOrdering::Release);
            esp_ble_gatts_start_service(svc_handle);
            match BLE_SETUP_STEP.load(AtomicOrdering::Acquire) {
                1 => {
                    BLE_SETUP_STEP.store(2, AtomicOrdering::Release);
                    add_gatt_char(
                        svc_handle,
                        SD_CHAR_UUID,
                        ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_INDICATE,
                    );
                }
                4 => {
                    BLE_SETUP_STEP.store(5, AtomicOrdering::Release);
                    add_gatt_char(
                        svc_handle,
                        CONFIG_CHAR_UUID,
                        ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                    );
                }
                step => warn!("BLE GATTS: unexpected service at step {}", step),
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = (*param).add_char.attr_handle;
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Acquire);
            match BLE_SETUP_STEP.load(AtomicOrdering::Acquire) {
                2 => {
                    BLE_SD_CHAR_HANDLE.store(handle, AtomicOrdering::Release);
                    BLE_SETUP_STEP.store(3, AtomicOrdering::Release);
                    log::info!("BLE GATTS: records char (handle={})", handle);
                    add_cccd(svc_handle);
                }
                5 => {
                    BLE_CFG_CHAR_HANDLE.store(handle, AtomicOrdering::Release);
                    BLE_SETUP_STEP.store(6, AtomicOrdering::Release);
                    log::info!("BLE GATTS: config char (handle={})", handle);
                    add_cccd(svc_handle);
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            match BLE_SETUP_STEP.load(AtomicOrdering::Acquire) {
                3 => {
                    BLE_SETUP_STEP.store(4, AtomicOrdering::Release);
                    create_service(gatts_if, CONFIG_SERVICE_UUID);
                }
                6 => {
                    BLE_SETUP_STEP.store(7, AtomicOrdering::Release);
                    log::info!("BLE GATTS: all services registered");
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            callbacks.on_connect((*param).connect.conn_id);
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            callbacks.on_mtu((*param).mtu.mtu);
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            callbacks.on_disconnect();
            start_advertising();
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = &(*param).write;
            if p.need_rsp {
                esp_ble_gatts_send_response(
                    gatts_if,
                    p.conn_id,
                    p.trans_id,
                    esp_gatt_status_t_ESP_GATT_OK,
                    core::ptr::null_mut(),
                );
            }
            let data = core::slice::from_raw_parts(p.value, p.len as usize);
            if p.handle == BLE_SD_CHAR_HANDLE.load(AtomicOrdering::Acquire) {
                callbacks.on_write(Endpoint::Records, p.conn_id, data);
            } else if p.handle == BLE_CFG_CHAR_HANDLE.load(AtomicOrdering::Acquire) {
                callbacks.on_write(Endpoint::Config, p.conn_id, data);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            let p = &(*param).conf;
            if p.handle == BLE_SD_CHAR_HANDLE.load(AtomicOrdering::Acquire) {
                callbacks.on_indication_status(p.status == esp_gatt_status_t_ESP_GATT_OK);
            }
        }
        _ => {}
    }
}

/// Bluedroid-backed [`Link`].
#[cfg(target_os = "espidf")]
pub struct BleLink {
    callbacks: LinkCallbacks,
}

#[cfg(target_os = "espidf")]
impl Link for BleLink {
    fn negotiated_unit_size(&self) -> u16 {
        self.callbacks.shared().mtu()
    }

    fn send(
        &mut self,
        endpoint: Endpoint,
        connection: ConnectionId,
        frame: &[u8],
    ) -> Result<Delivery, LinkError> {
        use esp_idf_svc::sys::*;
        if !self.callbacks.shared().is_connected() {
            return Err(LinkError::NotConnected);
        }
        let (handle, confirm) = match endpoint {
            Endpoint::Records => (BLE_SD_CHAR_HANDLE.load(AtomicOrdering::Acquire), true),
            Endpoint::Config => (BLE_CFG_CHAR_HANDLE.load(AtomicOrdering::Acquire), false),
        };
        // SAFETY: the stack copies `frame` before returning.
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Acquire),
                connection,
                handle,
                frame.len() as u16,
                frame.as_ptr() as *mut u8,
                confirm,
            )
        };
        match ret {
            ESP_OK if confirm => Ok(Delivery::AwaitAck),
            ESP_OK => Ok(Delivery::Sent),
            ESP_ERR_NO_MEM => Err(LinkError::Busy),
            e => Err(LinkError::Stack(e)),
        }
    }
}

/// Owns the Bluedroid stack lifecycle.
pub struct BleAdapter {
    state: BleState,
    device_name: heapless::String<32>,
    target_mtu: u16,
}

impl BleAdapter {
    pub fn new(device_name: heapless::String<32>, target_mtu: u16) -> Self {
        Self {
            state: BleState::Idle,
            device_name,
            target_mtu,
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Bring up the stack and start advertising. Stack events go to
    /// `callbacks` from here on.
    pub fn start(&mut self, callbacks: LinkCallbacks) {
        info!("BLE: starting advertising as '{}'", self.device_name);
        self.platform_start(callbacks);
    }

    #[cfg(target_os = "espidf")]
    pub fn link(&self) -> Option<BleLink> {
        LINK_CALLBACKS.get().map(|callbacks| BleLink {
            callbacks: callbacks.clone(),
        })
    }

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self, callbacks: LinkCallbacks) {
        use esp_idf_svc::sys::*;
        if LINK_CALLBACKS.set(callbacks).is_err() {
            warn!("BLE: already started");
            return;
        }
        unsafe {
            // BLE only; classic BT memory is returned to the heap.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let ret = esp_bt_controller_init(&mut bt_cfg);
            if ret != ESP_OK {
                error!("BLE: bt_controller_init failed ({})", ret);
                self.state = BleState::Failed;
                return;
            }
            let ret = esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE);
            if ret != ESP_OK {
                error!("BLE: bt_controller_enable failed ({})", ret);
                self.state = BleState::Failed;
                return;
            }
            let ret = esp_bluedroid_init();
            if ret != ESP_OK {
                error!("BLE: bluedroid_init failed ({})", ret);
                self.state = BleState::Failed;
                return;
            }
            let ret = esp_bluedroid_enable();
            if ret != ESP_OK {
                error!("BLE: bluedroid_enable failed ({})", ret);
                self.state = BleState::Failed;
                return;
            }

            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            esp_ble_gatts_app_register(0);
            esp_ble_gatt_set_local_mtu(self.target_mtu);

            let mut name = [0u8; 33];
            let len = self.device_name.len().min(32);
            name[..len].copy_from_slice(&self.device_name.as_bytes()[..len]);
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);

            let mut adv_data = esp_ble_adv_data_t {
                set_scan_rsp: false,
                include_name: true,
                include_txpower: false,
                min_interval: 0x0006,
                max_interval: 0x0010,
                flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                ..core::mem::zeroed()
            };
            // Advertising starts once the data is set (GAP event).
            esp_ble_gap_config_adv_data(&mut adv_data);
        }
        self.state = BleState::Advertising;
        info!(
            "BLE(espidf): Bluedroid up, MTU target {}, advertising as '{}'",
            self.target_mtu, self.device_name
        );
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self, _callbacks: LinkCallbacks) {
        info!(
            "BLE(sim): advertising '{}' (services {:032x}, {:032x}), MTU target {}",
            self.device_name, SD_SERVICE_UUID, CONFIG_SERVICE_UUID, self.target_mtu
        );
        self.state = BleState::Advertising;
    }

    pub fn stop(&mut self) {
        #[cfg(target_os = "espidf")]
        unsafe {
            use esp_idf_svc::sys::*;
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        self.state = BleState::Idle;
        info!("BLE: stopped");
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

/// In-process stand-in for the radio and the peer.
///
/// Frames handed to [`Link::send`] are recorded. Indications are confirmed
/// immediately when `auto_confirm` is set, from inside `send`, the way a
/// fast peer can beat the stack call returning.
#[cfg(not(target_os = "espidf"))]
pub struct SimulatedLink {
    callbacks: LinkCallbacks,
    connection: ConnectionId,
    pub auto_confirm: bool,
    /// Results returned by the next `send` calls, before falling back to success.
    pub script: std::collections::VecDeque<Result<Delivery, LinkError>>,
    sent: Vec<(Endpoint, Vec<u8>)>,
}

#[cfg(not(target_os = "espidf"))]
impl SimulatedLink {
    pub fn new(callbacks: LinkCallbacks) -> Self {
        Self {
            callbacks,
            connection: 0,
            auto_confirm: true,
            script: std::collections::VecDeque::new(),
            sent: Vec::new(),
        }
    }

    pub fn connect(&mut self, connection: ConnectionId, mtu: u16) {
        self.connection = connection;
        self.callbacks.on_connect(connection);
        self.callbacks.on_mtu(mtu);
    }

    pub fn disconnect(&mut self) {
        self.callbacks.on_disconnect();
    }

    /// The peer writes `data` to the characteristic of `endpoint`.
    pub fn peer_write(&self, endpoint: Endpoint, data: &[u8]) -> crate::transfer::WriteOutcome {
        self.callbacks.on_write(endpoint, self.connection, data)
    }

    /// The peer confirms the outstanding indication.
    pub fn confirm(&self) {
        self.callbacks.on_indication_status(true);
    }

    pub fn sent(&self) -> &[(Endpoint, Vec<u8>)] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<(Endpoint, Vec<u8>)> {
        core::mem::take(&mut self.sent)
    }
}

#[cfg(not(target_os = "espidf"))]
impl Link for SimulatedLink {
    fn negotiated_unit_size(&self) -> u16 {
        self.callbacks.shared().mtu()
    }

    fn send(
        &mut self,
        endpoint: Endpoint,
        connection: ConnectionId,
        frame: &[u8],
    ) -> Result<Delivery, LinkError> {
        if !self.callbacks.shared().is_connected() || connection != self.connection {
            return Err(LinkError::NotConnected);
        }
        if let Some(result) = self.script.pop_front() {
            if let Ok(delivery) = result {
                self.sent.push((endpoint, frame.to_vec()));
                return Ok(delivery);
            }
            return result;
        }
        self.sent.push((endpoint, frame.to_vec()));
        match endpoint {
            Endpoint::Records => {
                if self.auto_confirm {
                    self.callbacks.on_indication_status(true);
                }
                Ok(Delivery::AwaitAck)
            }
            Endpoint::Config => Ok(Delivery::Sent),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::SharedLink;
    use crate::transfer::ack::AckState;
    use std::sync::Arc;

    fn sim() -> SimulatedLink {
        SimulatedLink::new(LinkCallbacks::new(Arc::new(SharedLink::default())))
    }

    #[test]
    fn uuids_match_layout() {
        assert_eq!(
            format!("{:032x}", SD_CHAR_UUID),
            "0002010083a3449eafeb52e55909e63c"
        );
        assert_eq!(CONFIG_SERVICE_UUID >> 96, 0x0001_0000);
    }

    #[test]
    fn adapter_lifecycle() {
        let mut name = heapless::String::<32>::new();
        name.push_str("osbk-test").ok();
        let mut adapter = BleAdapter::new(name, 517);
        assert_eq!(adapter.state(), BleState::Idle);
        adapter.start(sim().callbacks.clone());
        assert_eq!(adapter.state(), BleState::Advertising);
        adapter.stop();
        assert_eq!(adapter.state(), BleState::Idle);
    }

    #[test]
    fn send_requires_connection() {
        let mut link = sim();
        assert_eq!(
            link.send(Endpoint::Records, 0, b"x"),
            Err(LinkError::NotConnected)
        );
        link.connect(3, 517);
        assert_eq!(link.negotiated_unit_size(), 517);
        assert_eq!(link.send(Endpoint::Config, 3, b"x"), Ok(Delivery::Sent));
    }

    #[test]
    fn indication_is_confirmed_inside_send() {
        let mut link = sim();
        link.connect(1, 247);
        link.callbacks.shared().ack.arm();
        assert_eq!(link.send(Endpoint::Records, 1, b"x"), Ok(Delivery::AwaitAck));
        assert_eq!(link.callbacks.shared().ack.load(), AckState::Acknowledged);
    }

    #[test]
    fn scripted_failures_come_first() {
        let mut link = sim();
        link.connect(1, 517);
        link.script.push_back(Err(LinkError::Busy));
        assert_eq!(link.send(Endpoint::Records, 1, b"x"), Err(LinkError::Busy));
        assert!(link.sent().is_empty());
        assert!(link.send(Endpoint::Records, 1, b"x").is_ok());
        assert_eq!(link.take_sent().len(), 1);
    }
}
