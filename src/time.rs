//! Current time (`0x09`) and countdown timer (`0x18`) codecs

use crate::types::{CommandCode, GShockError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

pub const TIME_RECORD_LEN: usize = 10;

/// Encode a local date-time into the 10-byte time record
///
/// ```text
/// YY YY MM DD hh mm ss WD cc 01
/// year little endian, ISO weekday (1 = Monday), hundredths of a second
/// ```
pub fn encode_time_record(date: &NaiveDateTime) -> Result<[u8; TIME_RECORD_LEN]> {
    let year = u16::try_from(date.year())
        .map_err(|_| GShockError::InvalidValue(format!("year {}", date.year())))?;
    let [lo, hi] = year.to_le_bytes();
    // Leap seconds report nanos past 1e9.
    let hundredths = (date.nanosecond() % 1_000_000_000) / 10_000_000;

    Ok([
        lo,
        hi,
        date.month() as u8,
        date.day() as u8,
        date.hour() as u8,
        date.minute() as u8,
        date.second() as u8,
        date.weekday().number_from_monday() as u8,
        hundredths as u8,
        1,
    ])
}

/// Full `0x09` command that sets the watch clock
pub fn encode_current_time(date: &NaiveDateTime) -> Result<Vec<u8>> {
    let mut out = vec![CommandCode::CurrentTime.to_u8()];
    out.extend_from_slice(&encode_time_record(date)?);
    Ok(out)
}

/// Decode a `0x09` command back into a date-time
pub fn decode_current_time(data: &[u8]) -> Result<NaiveDateTime> {
    if data.first() != Some(&CommandCode::CurrentTime.to_u8()) {
        return Err(GShockError::DecodingError(
            "not a current time record".to_string(),
        ));
    }
    if data.len() < 1 + TIME_RECORD_LEN {
        return Err(GShockError::PacketTooShort {
            what: "current time",
            len: data.len(),
        });
    }
    let r = &data[1..];
    let year = i32::from(u16::from_le_bytes([r[0], r[1]]));
    NaiveDate::from_ymd_opt(year, u32::from(r[2]), u32::from(r[3]))
        .and_then(|d| {
            d.and_hms_nano_opt(
                u32::from(r[4]),
                u32::from(r[5]),
                u32::from(r[6]),
                u32::from(r[8]) * 10_000_000,
            )
        })
        .ok_or_else(|| GShockError::DecodingError(format!("invalid date in time record {:?}", r)))
}

/// Countdown timer length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub seconds: u32,
}

/// Longest timer the watch accepts: 23:59:59
pub const MAX_TIMER_SECONDS: u32 = 24 * 3600 - 1;

impl Timer {
    pub fn new(seconds: u32) -> Self {
        Self { seconds }
    }

    /// `18 HH MM SS ...`
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&CommandCode::Timer.to_u8()) {
            return Err(GShockError::DecodingError("not a timer record".to_string()));
        }
        if data.len() < 4 {
            return Err(GShockError::PacketTooShort {
                what: "timer",
                len: data.len(),
            });
        }
        let (hours, minutes, seconds) = (data[1], data[2], data[3]);
        Ok(Self {
            seconds: u32::from(hours) * 3600 + u32::from(minutes) * 60 + u32::from(seconds),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.seconds > MAX_TIMER_SECONDS {
            return Err(GShockError::InvalidValue(format!(
                "timer of {} seconds",
                self.seconds
            )));
        }
        let hours = self.seconds / 3600;
        let minutes = (self.seconds % 3600) / 60;
        let seconds = self.seconds % 60;
        Ok(vec![
            CommandCode::Timer.to_u8(),
            hours as u8,
            minutes as u8,
            seconds as u8,
            0,
            0,
            0,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_milli_opt(h, mi, s, ms)
            .unwrap()
    }

    #[test]
    fn test_encode_time_record() {
        // 2023-06-14 was a Wednesday
        let record = encode_time_record(&at(2023, 6, 14, 13, 45, 7, 560)).unwrap();
        assert_eq!(
            record,
            [0xE7, 0x07, 0x06, 0x0E, 0x0D, 0x2D, 0x07, 0x03, 56, 0x01]
        );
    }

    #[test]
    fn test_sunday_is_seven() {
        let record = encode_time_record(&at(2024, 1, 7, 0, 0, 0, 0)).unwrap();
        assert_eq!(record[7], 7);
        assert_eq!(record[8], 0);
    }

    #[test]
    fn test_current_time_command_prefix() {
        let cmd = encode_current_time(&at(2024, 2, 29, 23, 59, 59, 990)).unwrap();
        assert_eq!(cmd.len(), 11);
        assert_eq!(cmd[0], 0x09);
        assert_eq!(cmd[9], 99);
    }

    #[test]
    fn test_time_round_trip() {
        let samples = [
            at(2000, 1, 1, 0, 0, 0, 0),
            at(2023, 12, 31, 23, 59, 59, 990),
            at(2024, 2, 29, 12, 30, 15, 120),
            at(2099, 7, 4, 6, 7, 8, 500),
        ];
        for sample in samples {
            let cmd = encode_current_time(&sample).unwrap();
            assert_eq!(decode_current_time(&cmd).unwrap(), sample);
        }
    }

    #[test]
    fn test_decode_current_time_errors() {
        assert!(decode_current_time(&[0x09, 0xE7]).is_err());
        let mut bad = encode_current_time(&at(2023, 1, 1, 0, 0, 0, 0)).unwrap();
        bad[3] = 13;
        assert!(decode_current_time(&bad).is_err());
    }

    #[test]
    fn test_timer_decode() {
        let timer = Timer::decode(&[0x18, 0x01, 0x02, 0x03, 0, 0, 0]).unwrap();
        assert_eq!(timer.seconds, 3723);
    }

    #[test]
    fn test_timer_encode() {
        assert_eq!(
            Timer::new(3723).encode().unwrap(),
            vec![0x18, 0x01, 0x02, 0x03, 0, 0, 0]
        );
        assert!(Timer::new(MAX_TIMER_SECONDS + 1).encode().is_err());
    }

    #[test]
    fn test_timer_round_trip() {
        for seconds in [0, 1, 59, 60, 3599, 3600, 45_296, MAX_TIMER_SECONDS] {
            let timer = Timer::new(seconds);
            assert_eq!(Timer::decode(&timer.encode().unwrap()).unwrap(), timer);
        }
    }
}
