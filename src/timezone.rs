//! Casio home-time zone table and lookup
//!
//! The watch only knows a fixed list of cities, each with a standard offset,
//! a DST amount (both in 15 minute units) and a DST rule id that tells the
//! watch when to switch. An arbitrary IANA zone is mapped onto that list.

use crate::types::{GShockError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use log::debug;
use serde::Serialize;

struct TimeZoneEntry {
    name: &'static str,
    zone: &'static str,
    dst_rules: u8,
}

const fn entry(name: &'static str, zone: &'static str, dst_rules: u8) -> TimeZoneEntry {
    TimeZoneEntry {
        name,
        zone,
        dst_rules,
    }
}

// Order matters: the first rule-equivalent entry wins.
const TIME_ZONE_TABLE: &[TimeZoneEntry] = &[
    entry("BAKER ISLAND", "Etc/GMT+12", 0x00),
    entry("MARQUESAS ISLANDS", "Pacific/Marquesas", 0xDA),
    entry("PAGO PAGO", "Pacific/Pago_Pago", 0x00),
    entry("HONOLULU", "Pacific/Honolulu", 0x00),
    entry("ANCHORAGE", "America/Anchorage", 0x01),
    entry("LOS ANGELES", "America/Los_Angeles", 0x01),
    entry("DENVER", "America/Denver", 0x01),
    entry("CHICAGO", "America/Chicago", 0x01),
    entry("NEW YORK", "America/New_York", 0x01),
    entry("HALIFAX", "America/Halifax", 0x01),
    entry("ST.JOHN'S", "America/St_Johns", 0x01),
    entry("RIO DE JANEIRO", "America/Sao_Paulo", 0x00),
    entry("F.DE NORONHA", "America/Noronha", 0x00),
    entry("PRAIA", "Atlantic/Cape_Verde", 0x00),
    entry("UTC", "UTC", 0x00),
    entry("LONDON", "Europe/London", 0x02),
    entry("PARIS", "Europe/Paris", 0x02),
    entry("ATHENS", "Europe/Athens", 0x02),
    entry("JEDDAH", "Asia/Riyadh", 0x00),
    entry("JERUSALEM", "Asia/Jerusalem", 0x2A),
    entry("TEHRAN", "Asia/Tehran", 0x2B),
    entry("DUBAI", "Asia/Dubai", 0x00),
    entry("KABUL", "Asia/Kabul", 0x00),
    entry("KARACHI", "Asia/Karachi", 0x00),
    entry("DELHI", "Asia/Kolkata", 0x00),
    entry("KATHMANDU", "Asia/Kathmandu", 0x00),
    entry("DHAKA", "Asia/Dhaka", 0x00),
    entry("YANGON", "Asia/Yangon", 0x00),
    entry("BANGKOK", "Asia/Bangkok", 0x00),
    entry("HONG KONG", "Asia/Hong_Kong", 0x00),
    entry("PYONGYANG", "Asia/Pyongyang", 0x00),
    entry("EUCLA", "Australia/Eucla", 0x00),
    entry("TOKYO", "Asia/Tokyo", 0x00),
    entry("ADELAIDE", "Australia/Adelaide", 0x04),
    entry("SYDNEY", "Australia/Sydney", 0x04),
    entry("LORD HOWE ISLAND", "Australia/Lord_Howe", 0x12),
    entry("NOUMEA", "Pacific/Noumea", 0x00),
    entry("WELLINGTON", "Pacific/Auckland", 0x05),
    entry("CHATHAM ISLANDS", "Pacific/Chatham", 0x17),
    entry("NUKUALOFA", "Pacific/Tongatapu", 0x00),
    entry("KIRITIMATI", "Pacific/Kiritimati", 0x00),
    entry("CASABLANCA", "Africa/Casablanca", 0x0F),
    entry("BEIRUT", "Asia/Beirut", 0x0C),
    entry("NORFOLK ISLAND", "Pacific/Norfolk", 0x04),
    entry("EASTER ISLAND", "Pacific/Easter", 0x1C),
    entry("HAVANA", "America/Havana", 0x15),
    entry("SANTIAGO", "America/Santiago", 0x1B),
    entry("ASUNCION", "America/Asuncion", 0x09),
    entry("PONTA DELGADA", "Atlantic/Azores", 0x02),
];

/// Days of offsets compared when deciding whether two zones behave the same
const EQUIVALENCE_WINDOW_DAYS: i64 = 366;

/// A zone resolved against the Casio table at a given instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CasioTimeZone {
    /// City name as the watch displays it
    pub name: String,
    /// IANA zone id
    pub zone: String,
    /// Standard UTC offset in 15 minute units
    pub offset: i8,
    /// DST amount in 15 minute units, 0 when the zone has no DST
    pub dst_offset: i8,
    /// Casio DST rule id, forced to 0 for zones without DST
    pub dst_rules: u8,
    /// Whether DST is in effect at the lookup instant
    pub in_dst: bool,
}

impl CasioTimeZone {
    fn resolve(name: &str, zone_name: &str, tz: Tz, dst_rules: u8, now: DateTime<Utc>) -> Self {
        let current = tz.offset_from_utc_datetime(&now.naive_utc());
        let offset = quarter_hours(current.base_utc_offset());
        let dst_offset = dst_amount(tz, now);

        Self {
            name: name.to_string(),
            zone: zone_name.to_string(),
            offset,
            dst_offset,
            // The Casio table can be outdated (Tehran dropped DST).
            dst_rules: if dst_offset == 0 { 0 } else { dst_rules },
            in_dst: !current.dst_offset().is_zero(),
        }
    }

    pub fn has_rules(&self) -> bool {
        self.dst_rules != 0
    }

    /// Flags for the DST watch-state register: bit0 DST on, bit1 automatic
    pub fn dst_state_flags(&self) -> u8 {
        let mut flags = 0;
        if self.in_dst {
            flags |= 0x01;
        }
        if self.has_rules() {
            flags |= 0x02;
        }
        flags
    }
}

fn quarter_hours(duration: Duration) -> i8 {
    (duration.num_minutes() / 15) as i8
}

/// Largest DST shift the zone applies over the next year
fn dst_amount(tz: Tz, now: DateTime<Utc>) -> i8 {
    (0..EQUIVALENCE_WINDOW_DAYS)
        .map(|day| {
            let at = (now + Duration::days(day)).naive_utc();
            quarter_hours(tz.offset_from_utc_datetime(&at).dst_offset()).abs()
        })
        .max()
        .unwrap_or(0)
}

/// Two zones are equivalent when they agree on standard offset and DST
/// shift at every hour of the coming year.
fn is_equivalent(a: Tz, b: Tz, now: DateTime<Utc>) -> bool {
    let hours = EQUIVALENCE_WINDOW_DAYS * 24;
    (0..hours).all(|hour| {
        let at = (now + Duration::hours(hour)).naive_utc();
        let oa = a.offset_from_utc_datetime(&at);
        let ob = b.offset_from_utc_datetime(&at);
        oa.base_utc_offset() == ob.base_utc_offset() && oa.dst_offset() == ob.dst_offset()
    })
}

fn parse_zone(zone_name: &str) -> Result<Tz> {
    zone_name
        .parse::<Tz>()
        .map_err(|_| GShockError::InvalidValue(format!("unknown time zone {}", zone_name)))
}

/// City name derived from a zone id: `America/Port_of_Spain` -> `PORT OF SPAIN`
pub fn city_from_zone(zone_name: &str) -> String {
    zone_name
        .rsplit('/')
        .next()
        .unwrap_or(zone_name)
        .to_uppercase()
        .replace('_', " ")
}

/// Map an IANA zone onto the Casio table
///
/// Exact zone id first, then the first table entry whose offsets match over
/// the coming year, then a synthesized entry named after the city with no
/// DST rule.
pub fn find_time_zone(zone_name: &str, now: DateTime<Utc>) -> Result<CasioTimeZone> {
    let tz = parse_zone(zone_name)?;

    if let Some(entry) = TIME_ZONE_TABLE.iter().find(|e| e.zone == zone_name) {
        return Ok(CasioTimeZone::resolve(
            entry.name,
            entry.zone,
            tz,
            entry.dst_rules,
            now,
        ));
    }

    for entry in TIME_ZONE_TABLE {
        let candidate = parse_zone(entry.zone)?;
        if is_equivalent(candidate, tz, now) {
            debug!("{} is equivalent to {}", zone_name, entry.zone);
            return Ok(CasioTimeZone::resolve(
                entry.name,
                entry.zone,
                candidate,
                entry.dst_rules,
                now,
            ));
        }
    }

    debug!("No Casio city for {}, synthesizing one", zone_name);
    Ok(CasioTimeZone::resolve(
        &city_from_zone(zone_name),
        zone_name,
        tz,
        0,
        now,
    ))
}
