//! World city (`0x1F`), DST setting (`0x1E`) and DST watch state (`0x1D`) codecs
//!
//! ```text
//! 1F NN <18 ascii>                   city name of clock NN, slot 0 is home time
//! 1E NN A B OFF DSTOFF RULES         offsets in 15 minute units, A/B ignored
//! 1D 00 01 DST0 DST1 TZ0A TZ0B ...   DST flags for two clocks per register
//! ```

use crate::timezone::{city_from_zone, CasioTimeZone};
use crate::types::{ascii_field, ascii_padded, CommandCode, GShockError, Result};
use serde::{Deserialize, Serialize};

pub const CITY_NAME_LEN: usize = 18;
pub const DST_SETTING_LEN: usize = 7;

pub const DST_ON_MASK: u8 = 0x01;
pub const DST_AUTO_MASK: u8 = 0x02;

fn check_header(data: &[u8], code: CommandCode, what: &'static str) -> Result<u8> {
    if data.first() != Some(&code.to_u8()) {
        return Err(GShockError::DecodingError(format!("not a {} record", what)));
    }
    data.get(1)
        .copied()
        .ok_or(GShockError::PacketTooShort {
            what,
            len: data.len(),
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldCity {
    pub index: u8,
    pub city: String,
}

impl WorldCity {
    pub fn new(index: u8, city: impl Into<String>) -> Self {
        Self {
            index,
            city: city.into(),
        }
    }

    /// City for a zone id, named the way the watch displays it
    pub fn from_zone(index: u8, zone_name: &str) -> Self {
        Self::new(index, city_from_zone(zone_name))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let index = check_header(data, CommandCode::WorldCities, "world city")?;
        Ok(Self::new(index, ascii_field(data, 2)))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![CommandCode::WorldCities.to_u8(), self.index];
        out.extend(ascii_padded(&self.city, CITY_NAME_LEN));
        out
    }

    pub fn is_home_time(&self) -> bool {
        self.index == 0
    }
}

/// DST configuration of one world clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstSetting {
    pub index: u8,
    pub offset: i8,
    pub dst_offset: i8,
    pub dst_rules: u8,
}

impl DstSetting {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let index = check_header(data, CommandCode::DstSetting, "DST setting")?;
        if data.len() < DST_SETTING_LEN {
            return Err(GShockError::PacketTooShort {
                what: "DST setting",
                len: data.len(),
            });
        }
        Ok(Self {
            index,
            offset: data[4] as i8,
            dst_offset: data[5] as i8,
            dst_rules: data[6],
        })
    }
}

/// Patch a raw DST setting with the offsets and rules of `zone`
///
/// Records that are not exactly 7 bytes are returned untouched.
pub fn set_dst(raw: &[u8], zone: &CasioTimeZone) -> Vec<u8> {
    let mut out = raw.to_vec();
    if out.len() == DST_SETTING_LEN {
        out[4] = zone.offset as u8;
        out[5] = zone.dst_offset as u8;
        out[6] = zone.dst_rules;
    }
    out
}

/// DST flags of the two clocks held by one register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstWatchState {
    pub register: u8,
    pub flags: [u8; 2],
}

impl DstWatchState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let register = check_header(data, CommandCode::DstWatchState, "DST watch state")?;
        if data.len() < 5 {
            return Err(GShockError::PacketTooShort {
                what: "DST watch state",
                len: data.len(),
            });
        }
        Ok(Self {
            register,
            flags: [data[3], data[4]],
        })
    }

    pub fn dst_on(&self, clock: usize) -> bool {
        self.flags.get(clock).is_some_and(|f| f & DST_ON_MASK != 0)
    }

    pub fn dst_auto(&self, clock: usize) -> bool {
        self.flags.get(clock).is_some_and(|f| f & DST_AUTO_MASK != 0)
    }
}

/// Replace the flags of the first clock in a raw DST watch state record
pub fn set_dst_flags(raw: &[u8], flags: u8) -> Result<Vec<u8>> {
    if raw.len() < 4 {
        return Err(GShockError::PacketTooShort {
            what: "DST watch state",
            len: raw.len(),
        });
    }
    let mut out = raw.to_vec();
    out[3] = flags;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(offset: i8, dst_offset: i8, dst_rules: u8) -> CasioTimeZone {
        CasioTimeZone {
            name: "TEST".to_string(),
            zone: "Test/Zone".to_string(),
            offset,
            dst_offset,
            dst_rules,
            in_dst: false,
        }
    }

    #[test]
    fn test_world_city_encode() {
        let encoded = WorldCity::new(2, "TOKYO").encode();
        assert_eq!(encoded.len(), 20);
        assert_eq!(&encoded[..7], &[0x1F, 0x02, b'T', b'O', b'K', b'Y', b'O']);
        assert!(encoded[7..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_world_city_decode() {
        let mut data = vec![0x1F, 0x00];
        data.extend(b"NEW YORK");
        data.resize(20, 0);
        let city = WorldCity::decode(&data).unwrap();
        assert_eq!(city, WorldCity::new(0, "NEW YORK"));
        assert!(city.is_home_time());
    }

    #[test]
    fn test_world_city_long_name_truncated() {
        let encoded = WorldCity::new(1, "LLANFAIRPWLLGWYNGYLL").encode();
        assert_eq!(encoded.len(), 20);
        assert_eq!(
            WorldCity::decode(&encoded).unwrap().city,
            "LLANFAIRPWLLGWYNGY"
        );
    }

    #[test]
    fn test_world_city_from_zone() {
        assert_eq!(
            WorldCity::from_zone(0, "America/Los_Angeles"),
            WorldCity::new(0, "LOS ANGELES")
        );
    }

    #[test]
    fn test_world_city_header_errors() {
        assert!(WorldCity::decode(&[0x1E, 0x00]).is_err());
        assert!(matches!(
            WorldCity::decode(&[0x1F]),
            Err(GShockError::PacketTooShort { .. })
        ));
    }

    #[test]
    fn test_dst_setting_decode() {
        let setting = DstSetting::decode(&[0x1E, 0x00, 0x39, 0x01, 0xD0, 0x04, 0x00]).unwrap();
        assert_eq!(setting.offset, -48);
        assert_eq!(setting.dst_offset, 4);
        assert_eq!(setting.dst_rules, 0);
    }

    #[test]
    fn test_set_dst_patches_offsets() {
        let raw = [0x1E, 0x00, 0x39, 0x01, 0xD0, 0x04, 0x00];
        let patched = set_dst(&raw, &zone(-20, 4, 1));
        assert_eq!(patched, vec![0x1E, 0x00, 0x39, 0x01, 0xEC, 0x04, 0x01]);
    }

    #[test]
    fn test_set_dst_ignores_wrong_length() {
        let raw = [0x1E, 0x00, 0x39, 0x01, 0xD0];
        assert_eq!(set_dst(&raw, &zone(36, 0, 0)), raw.to_vec());
    }

    #[test]
    fn test_dst_watch_state() {
        let raw = [
            0x1D, 0x00, 0x01, 0x03, 0x02, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let state = DstWatchState::decode(&raw).unwrap();
        assert!(state.dst_on(0));
        assert!(state.dst_auto(0));
        assert!(!state.dst_on(1));
        assert!(state.dst_auto(1));
        assert!(!state.dst_on(5));

        let patched = set_dst_flags(&raw, DST_AUTO_MASK).unwrap();
        assert_eq!(patched[3], 0x02);
        assert_eq!(patched[4], 0x02);
        assert_eq!(patched.len(), raw.len());
    }

    #[test]
    fn test_set_dst_flags_short() {
        assert!(set_dst_flags(&[0x1D, 0x00, 0x01], 0).is_err());
    }
}
