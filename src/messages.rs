//! Watch message parsing
//!
//! Every notification from the watch starts with a command code. This module
//! derives the correlation key used to match a notification to the request
//! that triggered it, and turns the raw bytes into a typed [`WatchValue`].

use crate::alarms::{self, Alarm};
use crate::reminders::{self, ReminderSlot, ReminderTime};
use crate::settings::{Settings, TimeAdjustment};
use crate::status;
use crate::time::Timer;
use crate::types::{hex_dump, CommandCode, GShockError, Result, WatchButton};
use crate::world_cities::{DstSetting, DstWatchState, WorldCity};
use serde::Serialize;
use std::fmt;

/// Key identifying one cacheable resource on the watch
///
/// Two hex characters of the command code, extended with the sub-index
/// byte for codes that address several slots (`1F02` is world city 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Derive the key from the leading bytes of a message
    pub fn from_message(data: &[u8]) -> Result<Self> {
        let code = *data.first().ok_or(GShockError::EmptyMessage)?;
        let wide = CommandCode::from_u8(code)
            .map(CommandCode::is_wide)
            .unwrap_or(false);
        match (wide, data.get(1)) {
            (true, Some(sub)) => Ok(Self(format!("{:02X}{:02X}", code, sub))),
            _ => Ok(Self(format!("{:02X}", code))),
        }
    }

    /// Key for a command code and optional slot index
    pub fn for_code(code: CommandCode, sub: Option<u8>) -> Self {
        match sub {
            Some(sub) if code.is_wide() => Self(format!("{:02X}{:02X}", code.to_u8(), sub)),
            _ => Self(format!("{:02X}", code.to_u8())),
        }
    }

    /// The bytes to write to the request characteristic to ask for this key
    pub fn request_bytes(&self) -> Result<Vec<u8>> {
        (0..self.0.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&self.0[i..i + 2], 16)
                    .map_err(|e| GShockError::EncodingError(format!("key {}: {}", self.0, e)))
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded content of one watch message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum WatchValue {
    /// Alarms from one of the two alarm messages
    Alarms(Vec<Alarm>),
    Settings(Settings),
    TimeAdjustment(TimeAdjustment),
    Timer(Timer),
    ReminderTitle(ReminderSlot<String>),
    ReminderTime(ReminderSlot<ReminderTime>),
    WorldCity(WorldCity),
    DstSetting(DstSetting),
    DstWatchState(DstWatchState),
    WatchName(String),
    Battery(u8),
    AppInformation(Vec<u8>),
    Button(WatchButton),
}

/// A decoded message together with the bytes it came from
///
/// The raw bytes are kept because several writes patch the record the
/// watch last reported instead of building one from scratch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchMessage {
    pub key: CorrelationKey,
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub value: WatchValue,
}

/// Message parser
pub struct MessageParser;

impl MessageParser {
    /// Decode a raw notification with the codec selected by its command code
    pub fn parse(data: &[u8]) -> Result<WatchValue> {
        let code = *data.first().ok_or(GShockError::EmptyMessage)?;

        match CommandCode::from_u8(code)? {
            CommandCode::SettingForAlarm | CommandCode::SettingForAlarm2 => {
                Ok(WatchValue::Alarms(alarms::decode(data)?))
            }
            CommandCode::SettingForBasic => Ok(WatchValue::Settings(Settings::decode(data)?)),
            CommandCode::SettingForBle => {
                Ok(WatchValue::TimeAdjustment(TimeAdjustment::decode(data)?))
            }
            CommandCode::Timer => Ok(WatchValue::Timer(Timer::decode(data)?)),
            CommandCode::ReminderTitle => {
                Ok(WatchValue::ReminderTitle(reminders::decode_title(data)?))
            }
            CommandCode::ReminderTime => Ok(WatchValue::ReminderTime(reminders::decode_time(data)?)),
            CommandCode::WorldCities => Ok(WatchValue::WorldCity(WorldCity::decode(data)?)),
            CommandCode::DstSetting => Ok(WatchValue::DstSetting(DstSetting::decode(data)?)),
            CommandCode::DstWatchState => {
                Ok(WatchValue::DstWatchState(DstWatchState::decode(data)?))
            }
            CommandCode::WatchName => Ok(WatchValue::WatchName(status::decode_watch_name(data)?)),
            CommandCode::WatchCondition => Ok(WatchValue::Battery(status::decode_battery(data)?)),
            CommandCode::AppInformation => Ok(WatchValue::AppInformation(data.to_vec())),
            CommandCode::BleFeatures => Ok(WatchValue::Button(status::decode_button(data))),
            CommandCode::Error => Err(GShockError::ProtocolError(hex_dump(data))),
            other => Err(GShockError::DecodingError(format!(
                "{} is never sent by the watch",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_key() {
        let key = CorrelationKey::from_message(&[0x1F, 0x02, b'T']).unwrap();
        assert_eq!(key.as_str(), "1F02");
        assert_eq!(key, CorrelationKey::for_code(CommandCode::WorldCities, Some(2)));
    }

    #[test]
    fn test_narrow_key() {
        let key = CorrelationKey::from_message(&[0x18, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(key.as_str(), "18");
        assert_eq!(key, CorrelationKey::for_code(CommandCode::Timer, Some(1)));
    }

    #[test]
    fn test_key_for_every_wide_family() {
        for (code, expected) in [
            (0x1D, "1D04"),
            (0x1E, "1E04"),
            (0x1F, "1F04"),
            (0x30, "3004"),
            (0x31, "3104"),
        ] {
            let key = CorrelationKey::from_message(&[code, 0x04, 0x00]).unwrap();
            assert_eq!(key.as_str(), expected);
        }
    }

    #[test]
    fn test_key_edge_cases() {
        assert_eq!(
            CorrelationKey::from_message(&[]),
            Err(GShockError::EmptyMessage)
        );
        assert_eq!(CorrelationKey::from_message(&[0x1F]).unwrap().as_str(), "1F");
        assert_eq!(CorrelationKey::from_message(&[0xAB, 0x01]).unwrap().as_str(), "AB");
    }

    #[test]
    fn test_request_bytes() {
        let key = CorrelationKey::for_code(CommandCode::DstSetting, Some(3));
        assert_eq!(key.request_bytes().unwrap(), vec![0x1E, 0x03]);
        let key = CorrelationKey::for_code(CommandCode::WatchCondition, None);
        assert_eq!(key.request_bytes().unwrap(), vec![0x28]);
    }

    #[test]
    fn test_parse_battery() {
        assert_eq!(
            MessageParser::parse(&[0x28, 0x13, 0x1E, 0x00]).unwrap(),
            WatchValue::Battery(96)
        );
    }

    #[test]
    fn test_parse_alarm_messages() {
        let value = MessageParser::parse(&[0x15, 0x40, 0x40, 0x07, 0x1E]).unwrap();
        assert_eq!(value, WatchValue::Alarms(vec![Alarm::new(7, 30, true, false)]));
    }

    #[test]
    fn test_parse_reminder_end_marker() {
        let value = MessageParser::parse(&[0x31, 0x03, 0x00, 0xFF]).unwrap();
        assert_eq!(
            value,
            WatchValue::ReminderTime(ReminderSlot::End { index: 3 })
        );
    }

    #[test]
    fn test_parse_error_and_unknown() {
        assert!(matches!(
            MessageParser::parse(&[0xFF, 0x01]),
            Err(GShockError::ProtocolError(_))
        ));
        assert_eq!(
            MessageParser::parse(&[0x77]),
            Err(GShockError::UnknownCommand(0x77))
        );
    }

    #[test]
    fn test_parse_short_payload_is_decode_failure() {
        assert!(matches!(
            MessageParser::parse(&[0x28, 0x13]),
            Err(GShockError::PacketTooShort { .. })
        ));
    }
}
