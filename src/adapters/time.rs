//! Time adapters implementing [`Clock`].
//!
//! - **`target_os = "espidf"`**: `esp_timer_get_time()` for the monotonic
//!   clock, FreeRTOS delay, `gettimeofday` for wall time.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` / `SystemTime`,
//!   plus [`SimClock`], a manually advanced clock for tests.

use crate::app::ports::Clock;
use crate::records::Timestamp;

/// Anything before 2020-01-01 means the RTC was never set.
const EPOCH_2020: u64 = 1_577_836_800;

/// Time adapter for the ESP32-S3 platform.
#[derive(Clone)]
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    #[cfg(target_os = "espidf")]
    fn unix_secs(&self) -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: plain out-parameter, no timezone requested.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        u64::try_from(tv.tv_sec).ok()
    }

    #[cfg(not(target_os = "espidf"))]
    fn unix_secs(&self) -> Option<u64> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs())
    }
}

impl Clock for Esp32TimeAdapter {
    fn now_ms(&self) -> u64 {
        self.uptime_us() / 1000
    }

    #[cfg(target_os = "espidf")]
    fn delay_ms(&self, ms: u32) {
        esp_idf_svc::hal::delay::FreeRtos::delay_ms(ms);
    }

    #[cfg(not(target_os = "espidf"))]
    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }

    fn current_time(&self) -> Option<Timestamp> {
        self.unix_secs()
            .filter(|&s| s >= EPOCH_2020)
            .map(Timestamp::from_unix_secs)
    }
}

/// Manually driven clock. Clones share the same time.
#[cfg(not(target_os = "espidf"))]
#[derive(Clone, Default)]
pub struct SimClock {
    now: std::rc::Rc<core::cell::Cell<u64>>,
    wall: std::rc::Rc<core::cell::Cell<Option<u64>>>,
}

#[cfg(not(target_os = "espidf"))]
impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    /// Set the wall clock (seconds since the Unix epoch).
    pub fn set_wall(&self, unix_secs: u64) {
        self.wall.set(Some(unix_secs));
    }
}

#[cfg(not(target_os = "espidf"))]
impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    /// Advances instead of sleeping.
    fn delay_ms(&self, ms: u32) {
        self.advance(u64::from(ms));
    }

    fn current_time(&self) -> Option<Timestamp> {
        self.wall.get().map(Timestamp::from_unix_secs)
    }
}
