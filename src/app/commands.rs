//! Inbound command identifiers.
//!
//! The two GATT characteristics reuse the byte values `0x00..=0x03` for
//! different commands, so a command byte is only meaningful together with
//! the [`Endpoint`] it arrived on.

/// The characteristic a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// SD-card service: measurement counts and ranges (indications).
    Records,
    /// Config service: file and configuration management (notifications).
    Config,
}

/// Commands on the [`Endpoint::Records`] characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordCommand {
    TotalCount = 0x00,
    NewCount = 0x01,
    AllRange = 0x02,
    NewRange = 0x03,
}

impl RecordCommand {
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::TotalCount),
            0x01 => Some(Self::NewCount),
            0x02 => Some(Self::AllRange),
            0x03 => Some(Self::NewRange),
            _ => None,
        }
    }
}

/// Commands on the [`Endpoint::Config`] characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigCommand {
    ListFiles = 0x00,
    GetFile = 0x01,
    SaveFile = 0x02,
    NewConfig = 0x03,
}

impl ConfigCommand {
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::ListFiles),
            0x01 => Some(Self::GetFile),
            0x02 => Some(Self::SaveFile),
            0x03 => Some(Self::NewConfig),
            _ => None,
        }
    }

    /// LIST_FILES and GET_FILE answer with a bare code byte; the stateful
    /// commands echo the command first.
    pub const fn is_simple(self) -> bool {
        matches!(self, Self::ListFiles | Self::GetFile)
    }
}

/// Status codes of the config service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0,
    UnknownCommand = 1,
    JsonError = 2,
    InvalidConfig = 3,
    FileNotFound = 4,
}

/// Text following the `[cmd, 0x01]` prefix for unknown record commands.
pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command";
