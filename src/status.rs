//! Watch condition, connection button, app information and watch name

use crate::types::{ascii_field, hex_dump, CommandCode, GShockError, Result, WatchButton};
use log::{debug, info};

/// Battery percentage from a `0x28` watch condition record
///
/// Byte 1 bit 0x10 contributes the first 50%, the low nibble of byte 2
/// the remaining 50% in fifteenths.
pub fn decode_battery(data: &[u8]) -> Result<u8> {
    if data.first() != Some(&CommandCode::WatchCondition.to_u8()) {
        return Err(GShockError::DecodingError(
            "not a watch condition record".to_string(),
        ));
    }
    if data.len() < 3 {
        return Err(GShockError::PacketTooShort {
            what: "watch condition",
            len: data.len(),
        });
    }
    let coarse: u32 = if data[1] & 0x10 != 0 { 50 } else { 0 };
    let fine = 50 * u32::from(data[2] & 0x0F) / 15;
    Ok((coarse + fine) as u8)
}

const BUTTON_RECORD_MIN_LEN: usize = 19;
const ALWAYS_CONNECTED_MASK: u8 = 0b1000;
const FIND_PHONE_MASK: u8 = 0b0010;
const LOWER_LEFT_MASK: u8 = 0b0001;
const LOWER_RIGHT_MASK: u8 = 0b0100;
const NO_BUTTON_VALUE: u8 = 0b0011;

/// Classify the button that started the connection from a `0x10` record
///
/// ```text
/// 10 17 62 07 38 85 CD 7F [04] 03 0F FF FF FF FF 24 00 00 00   lower right
/// 10 17 62 16 05 85 DD 7F [03] 03 0F FF FF FF FF 24 00 00 00   auto time
/// ```
pub fn decode_button(data: &[u8]) -> WatchButton {
    if data.len() < BUTTON_RECORD_MIN_LEN {
        return WatchButton::Invalid;
    }
    let value = data[8];
    if value & ALWAYS_CONNECTED_MASK != 0 {
        WatchButton::AlwaysConnected
    } else if value == NO_BUTTON_VALUE {
        WatchButton::NoButton
    } else if value & FIND_PHONE_MASK != 0 {
        WatchButton::FindPhone
    } else if value == 0 || value & LOWER_LEFT_MASK != 0 {
        WatchButton::LowerLeft
    } else if value & LOWER_RIGHT_MASK != 0 {
        WatchButton::LowerRight
    } else {
        WatchButton::LowerLeft
    }
}

/// App information as reported after a watch reset
pub const APP_INFO_RESET: [u8; 12] = [
    0x22, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// App information the lower-right button needs to work again after a reset
pub const APP_INFO_RECORD: [u8; 12] = [
    0x22, 0x34, 0x88, 0xF4, 0xE5, 0xD5, 0xAF, 0xC8, 0x29, 0xE0, 0x6D, 0x02,
];

/// Returns the record to write back when the watch lost its app information
pub fn app_info_reply(data: &[u8]) -> Option<&'static [u8]> {
    if data == APP_INFO_RESET {
        info!("Watch was reset, restoring app information");
        Some(&APP_INFO_RECORD)
    } else {
        debug!("App information {}", hex_dump(data));
        None
    }
}

/// Watch name from a `0x23` record, e.g. `CASIO GW-B5600`
pub fn decode_watch_name(data: &[u8]) -> Result<String> {
    if data.first() != Some(&CommandCode::WatchName.to_u8()) {
        return Err(GShockError::DecodingError(
            "not a watch name record".to_string(),
        ));
    }
    Ok(ascii_field(data, 1).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button_record(value: u8) -> Vec<u8> {
        let mut data = vec![
            0x10, 0x17, 0x62, 0x07, 0x38, 0x85, 0xCD, 0x7F, value, 0x03, 0x0F, 0xFF, 0xFF, 0xFF,
            0xFF, 0x24, 0x00, 0x00, 0x00,
        ];
        data.truncate(BUTTON_RECORD_MIN_LEN);
        data
    }

    #[test]
    fn test_battery_levels() {
        assert_eq!(decode_battery(&[0x28, 0x13, 0x1E, 0x00]).unwrap(), 96);
        assert_eq!(decode_battery(&[0x28, 0x03, 0x00, 0x00]).unwrap(), 0);
        assert_eq!(decode_battery(&[0x28, 0x13, 0x1F, 0x00]).unwrap(), 100);
        assert_eq!(decode_battery(&[0x28, 0x00, 0x0F, 0x00]).unwrap(), 50);
        assert_eq!(decode_battery(&[0x28, 0x10, 0x00]).unwrap(), 50);
    }

    #[test]
    fn test_battery_short_record() {
        assert!(matches!(
            decode_battery(&[0x28, 0x13]),
            Err(GShockError::PacketTooShort { .. })
        ));
        assert!(decode_battery(&[0x23, 0x13, 0x1E]).is_err());
    }

    #[test]
    fn test_button_classification() {
        assert_eq!(decode_button(&button_record(0x04)), WatchButton::LowerRight);
        assert_eq!(decode_button(&button_record(0x01)), WatchButton::LowerLeft);
        assert_eq!(decode_button(&button_record(0x00)), WatchButton::LowerLeft);
        assert_eq!(decode_button(&button_record(0x03)), WatchButton::NoButton);
        assert_eq!(decode_button(&button_record(0x02)), WatchButton::FindPhone);
        assert_eq!(
            decode_button(&button_record(0x08)),
            WatchButton::AlwaysConnected
        );
        assert_eq!(
            decode_button(&button_record(0x0C)),
            WatchButton::AlwaysConnected
        );
        assert_eq!(decode_button(&button_record(0x10)), WatchButton::LowerLeft);
    }

    #[test]
    fn test_button_short_record_is_invalid() {
        assert_eq!(decode_button(&[0x10, 0x17, 0x62]), WatchButton::Invalid);
        assert_eq!(decode_button(&[]), WatchButton::Invalid);
    }

    #[test]
    fn test_app_info_reply() {
        assert_eq!(app_info_reply(&APP_INFO_RESET), Some(&APP_INFO_RECORD[..]));
        assert_eq!(app_info_reply(&APP_INFO_RECORD), None);
    }

    #[test]
    fn test_watch_name() {
        let mut data = vec![0x23];
        data.extend(b"CASIO GW-B5600");
        data.extend([0, 0, 0, 0]);
        assert_eq!(decode_watch_name(&data).unwrap(), "CASIO GW-B5600");
        assert!(decode_watch_name(&[0x22]).is_err());
    }
}
