//! Basic settings (`0x13`) and time adjustment (`0x11`) codecs
//!
//! Basic settings record, 12 bytes:
//!
//! ```text
//! 13 SS LL 00 DD LG 00 00 00 00 00 00
//! SS  status bits: bit0 24h, bit1 button tone off, bit2 auto light off,
//!     bit4 power saving off, bit6 do-not-disturb off
//! LL  light duration (0 = short, 1 = long)
//! DD  date order (0 = MM:DD, 1 = DD:MM)
//! LG  language index
//! ```

use crate::types::{hex_dump, CommandCode, GShockError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

const MASK_24_HOURS: u8 = 0b0000_0001;
const MASK_BUTTON_TONE_OFF: u8 = 0b0000_0010;
const MASK_AUTO_LIGHT_OFF: u8 = 0b0000_0100;
const MASK_POWER_SAVING_OFF: u8 = 0b0001_0000;
const MASK_DO_NOT_DISTURB_OFF: u8 = 0b0100_0000;

pub const SETTINGS_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    #[serde(rename = "12h")]
    TwelveHour,
    #[serde(rename = "24h")]
    TwentyFourHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    #[serde(rename = "MM:DD")]
    MonthDay,
    #[serde(rename = "DD:MM")]
    DayMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightDuration {
    #[serde(rename = "2s")]
    Short,
    #[serde(rename = "4s")]
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Language {
    English = 0,
    Spanish = 1,
    French = 2,
    German = 3,
    Italian = 4,
    Russian = 5,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::English,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
        Language::Russian,
    ];

    /// Unknown indexes fall back to English
    pub fn from_u8(value: u8) -> Self {
        Self::ALL.get(usize::from(value)).copied().unwrap_or_else(|| {
            debug!("Unknown language index {}, using English", value);
            Language::English
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Locale and device settings stored on the watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub time_format: TimeFormat,
    pub date_format: DateFormat,
    pub language: Language,
    pub button_tone: bool,
    pub auto_light: bool,
    pub light_duration: LightDuration,
    pub power_saving_mode: bool,
    pub do_not_disturb: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_format: TimeFormat::TwelveHour,
            date_format: DateFormat::MonthDay,
            language: Language::English,
            button_tone: true,
            auto_light: false,
            light_duration: LightDuration::Short,
            power_saving_mode: false,
            do_not_disturb: false,
        }
    }
}

impl Settings {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&CommandCode::SettingForBasic.to_u8()) {
            return Err(GShockError::DecodingError(format!(
                "not a settings record: {}",
                hex_dump(data)
            )));
        }
        if data.len() < 6 {
            return Err(GShockError::PacketTooShort {
                what: "settings",
                len: data.len(),
            });
        }

        let status = data[1];
        let settings = Self {
            time_format: if status & MASK_24_HOURS != 0 {
                TimeFormat::TwentyFourHour
            } else {
                TimeFormat::TwelveHour
            },
            button_tone: status & MASK_BUTTON_TONE_OFF == 0,
            auto_light: status & MASK_AUTO_LIGHT_OFF == 0,
            power_saving_mode: status & MASK_POWER_SAVING_OFF == 0,
            do_not_disturb: status & MASK_DO_NOT_DISTURB_OFF == 0,
            light_duration: if data[2] == 1 {
                LightDuration::Long
            } else {
                LightDuration::Short
            },
            date_format: if data[4] == 1 {
                DateFormat::DayMonth
            } else {
                DateFormat::MonthDay
            },
            language: Language::from_u8(data[5]),
        };
        debug!("Decoded settings {:?}", settings);
        Ok(settings)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut arr = vec![0u8; SETTINGS_LEN];
        arr[0] = CommandCode::SettingForBasic.to_u8();

        if self.time_format == TimeFormat::TwentyFourHour {
            arr[1] |= MASK_24_HOURS;
        }
        if !self.button_tone {
            arr[1] |= MASK_BUTTON_TONE_OFF;
        }
        if !self.auto_light {
            arr[1] |= MASK_AUTO_LIGHT_OFF;
        }
        if !self.power_saving_mode {
            arr[1] |= MASK_POWER_SAVING_OFF;
        }
        if !self.do_not_disturb {
            arr[1] |= MASK_DO_NOT_DISTURB_OFF;
        }
        if self.light_duration == LightDuration::Long {
            arr[2] = 1;
        }
        if self.date_format == DateFormat::DayMonth {
            arr[4] = 1;
        }
        arr[5] = self.language.to_u8();
        arr
    }
}

/// Automatic time adjustment (phone sync) configuration, command `0x11`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAdjustment {
    pub enabled: bool,
    pub adjustment_minutes: u8,
}

const TIME_ADJUSTMENT_FLAG_INDEX: usize = 12;
const TIME_ADJUSTMENT_MINUTES_INDEX: usize = 13;
const DEFAULT_ADJUSTMENT_MINUTES: u8 = 30;

impl TimeAdjustment {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&CommandCode::SettingForBle.to_u8()) {
            return Err(GShockError::DecodingError(format!(
                "not a time adjustment record: {}",
                hex_dump(data)
            )));
        }
        if data.len() <= TIME_ADJUSTMENT_MINUTES_INDEX {
            return Err(GShockError::PacketTooShort {
                what: "time adjustment",
                len: data.len(),
            });
        }

        let minutes = data[TIME_ADJUSTMENT_MINUTES_INDEX];
        Ok(Self {
            enabled: data[TIME_ADJUSTMENT_FLAG_INDEX] == 0,
            adjustment_minutes: if minutes <= 59 {
                minutes
            } else {
                DEFAULT_ADJUSTMENT_MINUTES
            },
        })
    }

    /// Patch the last record read from the watch with the new values
    ///
    /// The watch expects the whole `0x11` record back, so only the two
    /// adjustment bytes change.
    pub fn encode(&self, original: &[u8]) -> Result<Vec<u8>> {
        if self.adjustment_minutes > 59 {
            return Err(GShockError::InvalidValue(format!(
                "adjustment minute {}",
                self.adjustment_minutes
            )));
        }
        // Validates the original record too.
        Self::decode(original)?;

        let mut out = original.to_vec();
        out[TIME_ADJUSTMENT_FLAG_INDEX] = if self.enabled { 0x00 } else { 0x80 };
        out[TIME_ADJUSTMENT_MINUTES_INDEX] = self.adjustment_minutes;
        Ok(out)
    }
}
