//! GPIO / peripheral pin assignments for the logger main board.
//!
//! Single source of truth for pin numbers; drivers reference this module.

// ---------------------------------------------------------------------------
// SD card (SPI2)
// ---------------------------------------------------------------------------

pub const SD_SCLK_GPIO: i32 = 36;
pub const SD_MOSI_GPIO: i32 = 35;
pub const SD_MISO_GPIO: i32 = 37;
/// Chip select, active LOW.
pub const SD_CS_GPIO: i32 = 34;

/// SPI clock used for the card once initialised (kHz).
pub const SD_SPI_FREQ_KHZ: u32 = 20_000;
