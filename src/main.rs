//! Data logger firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleAdapter    SdCardStore   CsvRecordStore   LiveConfig       │
//! │  (Link)        (FileStore)   (RecordStore)    (ConfigPort)     │
//! │  NvsAdapter    Esp32Time     LogEventSink                      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              TransferService (pure logic)              │    │
//! │  │  Supervisor · Outbound engine · Dispatcher · Index     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Result, anyhow};
use log::{info, warn};

use esp_idf_hal::gpio::{AnyIOPin, AnyInputPin, AnyOutputPin};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::sd::spi::SdSpiHostDriver;
use esp_idf_hal::sd::{SdCardConfiguration, SdCardDriver};
use esp_idf_hal::spi::{Dma, SpiDriver, config::DriverConfig};
use esp_idf_svc::fs::fatfs::Fatfs;
use esp_idf_svc::io::vfs::MountedFatfs;

use datalogger::adapters::ble::BleAdapter;
use datalogger::adapters::device_id;
use datalogger::adapters::live_config::LiveConfig;
use datalogger::adapters::log_sink::LogEventSink;
use datalogger::adapters::measurements::CsvRecordStore;
use datalogger::adapters::nvs::NvsAdapter;
use datalogger::adapters::sd_card::SdCardStore;
use datalogger::adapters::time::Esp32TimeAdapter;
use datalogger::app::ports::Clock;
use datalogger::app::service::TransferService;
use datalogger::pins;
use datalogger::transfer::config_files::ConfigFiles;

/// Loop period while nothing is in flight.
const IDLE_POLL_MS: u32 = 20;
/// Loop period during a transfer or upload.
const BUSY_POLL_MS: u32 = 1;
/// Files open at once on the card.
const SD_MAX_OPEN_FILES: usize = 4;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Data logger v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Settings from NVS (or defaults) ────────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {}", e))?;
    let settings = nvs.load_settings();

    // ── 3. SD card ────────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    // SAFETY: the SD pins are used by nothing else on this board.
    let (sclk, mosi, miso, cs) = unsafe {
        (
            AnyOutputPin::new(pins::SD_SCLK_GPIO),
            AnyOutputPin::new(pins::SD_MOSI_GPIO),
            AnyInputPin::new(pins::SD_MISO_GPIO),
            AnyOutputPin::new(pins::SD_CS_GPIO),
        )
    };
    let spi = SpiDriver::new(
        peripherals.spi2,
        sclk,
        mosi,
        Some(miso),
        &DriverConfig::default().dma(Dma::Auto(4096)),
    )?;
    let mut card_config = SdCardConfiguration::new();
    card_config.speed_khz = pins::SD_SPI_FREQ_KHZ;
    let card = SdCardDriver::new_spi(
        SdSpiHostDriver::new(
            spi,
            Some(cs),
            AnyIOPin::none(),
            AnyIOPin::none(),
            AnyIOPin::none(),
            None,
        )?,
        &card_config,
    )?;
    // Unmounts on drop; held for the lifetime of main.
    let _mounted = MountedFatfs::mount(
        Fatfs::new_sdcard(0, card)?,
        settings.sd_mount_point.as_str(),
        SD_MAX_OPEN_FILES,
    )?;
    info!("SD card mounted at {}", settings.sd_mount_point);

    let files = SdCardStore::mounted(settings.sd_mount_point.as_str());
    let records = CsvRecordStore::new(files.clone());

    // ── 4. Device configuration and identity ──────────────────
    let active = ConfigFiles::new(files.clone())
        .active_config()
        .unwrap_or_else(|| {
            warn!("No usable config.json, running with defaults");
            Default::default()
        });
    let name = device_id::device_name(&nvs, &device_id::read_mac());
    let live = LiveConfig::new(nvs, active);

    // ── 5. Transfer service ───────────────────────────────────
    let clock = Esp32TimeAdapter::new();
    let mut sink = LogEventSink::new();
    let mut service = TransferService::new(files, records, live, clock.clone(), settings.clone());

    if let Err(e) = service.startup_check(&mut sink) {
        warn!("Index check failed ({}), continuing", e);
    }

    // ── 6. BLE ────────────────────────────────────────────────
    let mut ble = BleAdapter::new(name, settings.target_mtu);
    ble.start(service.callbacks());
    let mut link = ble
        .link()
        .ok_or_else(|| anyhow!("BLE stack did not start ({:?})", ble.state()))?;

    info!("System ready. Entering transfer loop.");

    // ── 7. Transfer loop ──────────────────────────────────────
    loop {
        service.poll(&mut link, &mut sink);
        let period = if service.is_busy() {
            BUSY_POLL_MS
        } else {
            IDLE_POLL_MS
        };
        clock.delay_ms(period);
    }
}
