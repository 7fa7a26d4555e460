//! Common types, enums, and error definitions for the Casio watch protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for watch operations
pub type Result<T> = std::result::Result<T, GShockError>;

/// Error types for watch communication
///
/// Cloneable so a single failure can be handed to every caller waiting on
/// the same correlation key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GShockError {
    #[error("Packet too short for {what}: {len} bytes")]
    PacketTooShort { what: &'static str, len: usize },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Watch reported an error: {0}")]
    ProtocolError(String),

    #[error("Bluetooth error: {0}")]
    BluetoothError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Request for {0} was cancelled")]
    RequestCancelled(String),

    #[error("Invalid state: cannot {event} while {state}")]
    InvalidState { state: String, event: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("{0} is not supported by this watch")]
    Unsupported(&'static str),
}

/// Leading byte of every payload exchanged with the watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    CurrentTime = 0x09,
    BleFeatures = 0x10,
    SettingForBle = 0x11,
    SettingForBasic = 0x13,
    SettingForAlarm = 0x15,
    SettingForAlarm2 = 0x16,
    Timer = 0x18,
    DstWatchState = 0x1D,
    DstSetting = 0x1E,
    WorldCities = 0x1F,
    AppInformation = 0x22,
    WatchName = 0x23,
    WatchCondition = 0x28,
    ReminderTitle = 0x30,
    ReminderTime = 0x31,
    Error = 0xFF,
}

impl CommandCode {
    /// Convert a byte to a CommandCode
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x09 => Ok(CommandCode::CurrentTime),
            0x10 => Ok(CommandCode::BleFeatures),
            0x11 => Ok(CommandCode::SettingForBle),
            0x13 => Ok(CommandCode::SettingForBasic),
            0x15 => Ok(CommandCode::SettingForAlarm),
            0x16 => Ok(CommandCode::SettingForAlarm2),
            0x18 => Ok(CommandCode::Timer),
            0x1D => Ok(CommandCode::DstWatchState),
            0x1E => Ok(CommandCode::DstSetting),
            0x1F => Ok(CommandCode::WorldCities),
            0x22 => Ok(CommandCode::AppInformation),
            0x23 => Ok(CommandCode::WatchName),
            0x28 => Ok(CommandCode::WatchCondition),
            0x30 => Ok(CommandCode::ReminderTitle),
            0x31 => Ok(CommandCode::ReminderTime),
            0xFF => Ok(CommandCode::Error),
            _ => Err(GShockError::UnknownCommand(value)),
        }
    }

    /// Convert CommandCode to a byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Codes that address several slots and carry a sub-index in byte 1
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            CommandCode::DstWatchState
                | CommandCode::DstSetting
                | CommandCode::WorldCities
                | CommandCode::ReminderTitle
                | CommandCode::ReminderTime
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCode::CurrentTime => write!(f, "CASIO_CURRENT_TIME"),
            CommandCode::BleFeatures => write!(f, "CASIO_BLE_FEATURES"),
            CommandCode::SettingForBle => write!(f, "CASIO_SETTING_FOR_BLE"),
            CommandCode::SettingForBasic => write!(f, "CASIO_SETTING_FOR_BASIC"),
            CommandCode::SettingForAlarm => write!(f, "CASIO_SETTING_FOR_ALM"),
            CommandCode::SettingForAlarm2 => write!(f, "CASIO_SETTING_FOR_ALM2"),
            CommandCode::Timer => write!(f, "CASIO_TIMER"),
            CommandCode::DstWatchState => write!(f, "CASIO_DST_WATCH_STATE"),
            CommandCode::DstSetting => write!(f, "CASIO_DST_SETTING"),
            CommandCode::WorldCities => write!(f, "CASIO_WORLD_CITIES"),
            CommandCode::AppInformation => write!(f, "CASIO_APP_INFORMATION"),
            CommandCode::WatchName => write!(f, "CASIO_WATCH_NAME"),
            CommandCode::WatchCondition => write!(f, "CASIO_WATCH_CONDITION"),
            CommandCode::ReminderTitle => write!(f, "CASIO_REMINDER_TITLE"),
            CommandCode::ReminderTime => write!(f, "CASIO_REMINDER_TIME"),
            CommandCode::Error => write!(f, "ERROR"),
        }
    }
}

/// Button the user pressed to start the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchButton {
    LowerLeft,
    LowerRight,
    NoButton,
    FindPhone,
    AlwaysConnected,
    Invalid,
}

impl fmt::Display for WatchButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchButton::LowerLeft => write!(f, "LOWER_LEFT"),
            WatchButton::LowerRight => write!(f, "LOWER_RIGHT"),
            WatchButton::NoButton => write!(f, "NO_BUTTON"),
            WatchButton::FindPhone => write!(f, "FIND_PHONE"),
            WatchButton::AlwaysConnected => write!(f, "ALWAYS_CONNECTED"),
            WatchButton::Invalid => write!(f, "INVALID"),
        }
    }
}

/// DST watch-state registers. Each register holds the flags of two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DstRegister {
    Zero = 0,
    Two = 2,
    Four = 4,
}

impl DstRegister {
    pub const ALL: [DstRegister; 3] = [DstRegister::Zero, DstRegister::Two, DstRegister::Four];

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Format bytes as a space separated hex string for logging
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read zero padded ASCII from `offset` to the end, dropping NUL and non-ASCII bytes
pub(crate) fn ascii_field(data: &[u8], offset: usize) -> String {
    data.iter()
        .skip(offset)
        .filter(|b| **b != 0 && b.is_ascii())
        .map(|b| *b as char)
        .collect()
}

/// Encode `text` as ASCII into exactly `len` bytes, truncating or zero padding
pub(crate) fn ascii_padded(text: &str, len: usize) -> Vec<u8> {
    let mut out: Vec<u8> = text
        .chars()
        .filter(|c| c.is_ascii())
        .take(len)
        .map(|c| c as u8)
        .collect();
    out.resize(len, 0);
    out
}
