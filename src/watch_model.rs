//! Watch families and their capabilities
//!
//! The model is resolved once from the advertised device name (for example
//! `"CASIO GW-B5600"`) and then drives every per-family decision: how many
//! alarms the alarm accumulator waits for, how many world-city and DST slots
//! the time-sync preamble touches, and which features the watch has at all.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WatchModel {
    Ga,
    Gw,
    Dw,
    Gmw,
    Gpr,
    Gst,
    Msg,
    Gb001,
    Gbd,
    MrgB5000,
    GcwB5000,
    Eqb,
    Ecb,
    Abl100,
    DwH5600,
    Unknown,
}

/// Static capability record for one watch family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub world_cities_count: u8,
    pub dst_count: u8,
    pub alarm_count: u8,
    pub has_auto_light: bool,
    pub has_reminders: bool,
    pub has_world_cities: bool,
    pub has_battery_level: bool,
    pub has_power_saving_mode: bool,
    pub has_date_format: bool,
    pub always_connected: bool,
    pub short_light_duration: &'static str,
    pub long_light_duration: &'static str,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            world_cities_count: 2,
            dst_count: 1,
            alarm_count: 5,
            has_auto_light: false,
            has_reminders: false,
            has_world_cities: true,
            has_battery_level: true,
            has_power_saving_mode: true,
            has_date_format: true,
            always_connected: false,
            short_light_duration: "1.5s",
            long_light_duration: "3s",
        }
    }
}

const SIX_CITY_INFO: ModelInfo = ModelInfo {
    world_cities_count: 6,
    dst_count: 3,
    alarm_count: 5,
    has_auto_light: true,
    has_reminders: true,
    has_world_cities: true,
    has_battery_level: true,
    has_power_saving_mode: true,
    has_date_format: true,
    always_connected: false,
    short_light_duration: "2s",
    long_light_duration: "4s",
};

impl WatchModel {
    /// Resolve the family from a BLE device name such as `"CASIO GW-B5600"`
    pub fn from_device_name(name: &str) -> Self {
        let short_name = name.split(' ').nth(1).unwrap_or("");

        match short_name {
            s if s.starts_with("MRG-B5000") => WatchModel::MrgB5000,
            s if s.starts_with("GCW-B5000") => WatchModel::GcwB5000,
            s if s.starts_with("ABL-100") => WatchModel::Abl100,
            s if s.starts_with("G-B001") => WatchModel::Gb001,
            s if s.starts_with("GMW") => WatchModel::Gmw,
            s if s.starts_with("GST") => WatchModel::Gst,
            s if s.starts_with("GPR") => WatchModel::Gpr,
            s if s.starts_with("MSG") => WatchModel::Msg,
            s if s.starts_with("GBD") => WatchModel::Gbd,
            s if s.starts_with("EQB") => WatchModel::Eqb,
            s if s.starts_with("GMB") => WatchModel::Ga,
            "ECB-10" | "ECB-20" | "ECB-30" => WatchModel::Ecb,
            s if s.starts_with("GA") || s.starts_with("GB") => WatchModel::Ga,
            s if s.starts_with("GW") => WatchModel::Gw,
            s if s.starts_with("DW-H5600") => WatchModel::DwH5600,
            s if s.starts_with("DW") => WatchModel::Dw,
            _ => WatchModel::Unknown,
        }
    }

    pub fn info(self) -> ModelInfo {
        let base = ModelInfo::default();
        match self {
            WatchModel::Gw | WatchModel::MrgB5000 | WatchModel::GcwB5000 | WatchModel::Gmw => {
                SIX_CITY_INFO
            }
            WatchModel::Ga | WatchModel::Gst | WatchModel::Msg => ModelInfo {
                has_reminders: true,
                ..base
            },
            WatchModel::Abl100 => ModelInfo {
                has_battery_level: false,
                ..base
            },
            WatchModel::Gb001 | WatchModel::Dw | WatchModel::Gpr => ModelInfo {
                has_auto_light: true,
                ..base
            },
            WatchModel::Gbd | WatchModel::Eqb => ModelInfo {
                has_auto_light: true,
                has_world_cities: false,
                ..base
            },
            WatchModel::Ecb => ModelInfo {
                has_auto_light: true,
                has_battery_level: false,
                always_connected: true,
                has_power_saving_mode: false,
                ..base
            },
            WatchModel::DwH5600 => ModelInfo {
                alarm_count: 4,
                has_auto_light: true,
                has_battery_level: false,
                always_connected: true,
                has_date_format: false,
                short_light_duration: "1.5s",
                long_light_duration: "5s",
                ..base
            },
            WatchModel::Unknown => base,
        }
    }
}

impl fmt::Display for WatchModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchModel::Ga => "GA",
            WatchModel::Gw => "GW",
            WatchModel::Dw => "DW",
            WatchModel::Gmw => "GMW",
            WatchModel::Gpr => "GPR",
            WatchModel::Gst => "GST",
            WatchModel::Msg => "MSG",
            WatchModel::Gb001 => "GB001",
            WatchModel::Gbd => "GBD",
            WatchModel::MrgB5000 => "MRG_B5000",
            WatchModel::GcwB5000 => "GCW_B5000",
            WatchModel::Eqb => "EQB",
            WatchModel::Ecb => "ECB",
            WatchModel::Abl100 => "ABL_100",
            WatchModel::DwH5600 => "DW_H5600",
            WatchModel::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}
