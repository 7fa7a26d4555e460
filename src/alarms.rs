//! Alarm codec
//!
//! Alarms travel in two commands. `0x15` carries the first alarm, `0x16`
//! carries the remaining ones packed back to back. Each alarm is a 4-byte
//! record:
//!
//! ```text
//! [flags] [0x40] [hour] [minute]
//! flags: bit6 enabled, bit7 hourly chime
//! ```

use crate::types::{hex_dump, CommandCode, GShockError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

pub const ENABLED_MASK: u8 = 0x40;
pub const HOURLY_CHIME_MASK: u8 = 0x80;
const ALARM_RECORD_MARKER: u8 = 0x40;
const ALARM_RECORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub has_hourly_chime: bool,
}

impl Alarm {
    pub fn new(hour: u8, minute: u8, enabled: bool, has_hourly_chime: bool) -> Self {
        Self {
            hour,
            minute,
            enabled,
            has_hourly_chime,
        }
    }

    fn from_record(record: &[u8]) -> Self {
        let flags = record[0];
        Self {
            hour: record[2],
            minute: record[3],
            enabled: flags & ENABLED_MASK != 0,
            has_hourly_chime: flags & HOURLY_CHIME_MASK != 0,
        }
    }

    fn to_record(self) -> [u8; ALARM_RECORD_LEN] {
        let mut flags = 0u8;
        if self.enabled {
            flags |= ENABLED_MASK;
        }
        if self.has_hourly_chime {
            flags |= HOURLY_CHIME_MASK;
        }
        [flags, ALARM_RECORD_MARKER, self.hour, self.minute]
    }

    fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(GShockError::InvalidValue(format!(
                "alarm time {:02}:{:02}",
                self.hour, self.minute
            )));
        }
        Ok(())
    }
}

/// Decode one alarm message (either `0x15` or `0x16`)
pub fn decode(data: &[u8]) -> Result<Vec<Alarm>> {
    let code = *data.first().ok_or(GShockError::EmptyMessage)?;
    let body = &data[1..];

    match CommandCode::from_u8(code)? {
        CommandCode::SettingForAlarm => {
            if body.len() < ALARM_RECORD_LEN {
                return Err(GShockError::PacketTooShort {
                    what: "first alarm",
                    len: data.len(),
                });
            }
            Ok(vec![Alarm::from_record(&body[..ALARM_RECORD_LEN])])
        }
        CommandCode::SettingForAlarm2 => {
            let alarms: Vec<Alarm> = body
                .chunks_exact(ALARM_RECORD_LEN)
                .map(Alarm::from_record)
                .collect();
            debug!("Decoded {} secondary alarms from {}", alarms.len(), hex_dump(data));
            Ok(alarms)
        }
        other => Err(GShockError::DecodingError(format!(
            "{} is not an alarm command",
            other
        ))),
    }
}

/// Encode the first alarm as a `0x15` command
pub fn encode_first(alarm: &Alarm) -> Result<Vec<u8>> {
    alarm.validate()?;
    let mut out = vec![CommandCode::SettingForAlarm.to_u8()];
    out.extend_from_slice(&alarm.to_record());
    Ok(out)
}

/// Encode every alarm after the first as a single `0x16` command
pub fn encode_rest(alarms: &[Alarm]) -> Result<Vec<u8>> {
    let mut out = vec![CommandCode::SettingForAlarm2.to_u8()];
    for alarm in alarms {
        alarm.validate()?;
        out.extend_from_slice(&alarm.to_record());
    }
    Ok(out)
}

/// Encode a full alarm list into the two commands the watch expects
pub fn encode(alarms: &[Alarm]) -> Result<(Vec<u8>, Vec<u8>)> {
    let (first, rest) = alarms
        .split_first()
        .ok_or_else(|| GShockError::InvalidValue("alarm list is empty".to_string()))?;
    Ok((encode_first(first)?, encode_rest(rest)?))
}

/// Collects the two alarm messages into one ordered list
///
/// The first alarm always lands at position 0 no matter which message
/// arrives first. The list is complete once it holds `expected` alarms.
#[derive(Debug, Default)]
pub struct AlarmAccumulator {
    first: Option<Alarm>,
    rest: Vec<Alarm>,
    expected: usize,
}

impl AlarmAccumulator {
    pub fn new(expected: usize) -> Self {
        Self {
            first: None,
            rest: Vec::new(),
            expected,
        }
    }

    /// Feed one raw alarm message
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        let alarms = decode(data)?;
        if data[0] == CommandCode::SettingForAlarm.to_u8() {
            self.first = alarms.into_iter().next();
        } else {
            self.rest = alarms;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        usize::from(self.first.is_some()) + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.first.is_some() && self.len() >= self.expected
    }

    /// Return the ordered alarm list, or an error if a message is still missing
    pub fn finish(self) -> Result<Vec<Alarm>> {
        if !self.is_complete() {
            return Err(GShockError::DecodingError(format!(
                "expected {} alarms, got {}",
                self.expected,
                self.len()
            )));
        }
        let mut alarms = Vec::with_capacity(self.len());
        alarms.extend(self.first);
        alarms.extend(self.rest);
        alarms.truncate(self.expected);
        Ok(alarms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_first_alarm() {
        let alarms = decode(&[0x15, 0x40, 0x40, 0x07, 0x1E]).unwrap();
        assert_eq!(alarms, vec![Alarm::new(7, 30, true, false)]);
    }

    #[test]
    fn test_decode_secondary_alarms() {
        let data = [
            0x16, 0x00, 0x40, 0x08, 0x00, 0xC0, 0x40, 0x0C, 0x00, 0x00, 0x40, 0x12, 0x2D, 0x80,
            0x40, 0x17, 0x3B,
        ];
        let alarms = decode(&data).unwrap();
        assert_eq!(alarms.len(), 4);
        assert_eq!(alarms[0], Alarm::new(8, 0, false, false));
        assert_eq!(alarms[1], Alarm::new(12, 0, true, true));
        assert_eq!(alarms[3], Alarm::new(23, 59, false, true));
    }

    #[test]
    fn test_decode_short_first_alarm() {
        assert!(matches!(
            decode(&[0x15, 0x40]),
            Err(GShockError::PacketTooShort { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_other_codes() {
        assert!(decode(&[0x13, 0x00]).is_err());
        assert_eq!(decode(&[]), Err(GShockError::EmptyMessage));
    }

    #[test]
    fn test_encode_matches_wire_format() {
        let alarms = vec![
            Alarm::new(6, 45, true, true),
            Alarm::new(9, 0, false, false),
            Alarm::new(22, 15, true, false),
        ];
        let (first, rest) = encode(&alarms).unwrap();
        assert_eq!(first, vec![0x15, 0xC0, 0x40, 0x06, 0x2D]);
        assert_eq!(
            rest,
            vec![0x16, 0x00, 0x40, 0x09, 0x00, 0x40, 0x40, 0x16, 0x0F]
        );
    }

    #[test]
    fn test_round_trip_full_domain() {
        for hour in 0..24 {
            for minute in [0u8, 1, 29, 30, 59] {
                for (enabled, chime) in [(false, false), (true, false), (false, true), (true, true)]
                {
                    let alarm = Alarm::new(hour, minute, enabled, chime);
                    let encoded = encode_first(&alarm).unwrap();
                    assert_eq!(decode(&encoded).unwrap(), vec![alarm]);
                }
            }
        }
    }

    #[test]
    fn test_encode_rejects_invalid_time() {
        assert!(encode_first(&Alarm::new(24, 0, true, false)).is_err());
        assert!(encode_rest(&[Alarm::new(1, 60, true, false)]).is_err());
        assert!(encode(&[]).is_err());
    }

    #[test]
    fn test_accumulator_waits_for_both_messages() {
        let mut acc = AlarmAccumulator::new(5);
        acc.push(&[
            0x16, 0x00, 0x40, 0x08, 0x00, 0x00, 0x40, 0x09, 0x00, 0x00, 0x40, 0x0A, 0x00, 0x00,
            0x40, 0x0B, 0x00,
        ])
        .unwrap();
        assert_eq!(acc.len(), 4);
        assert!(!acc.is_complete());

        acc.push(&[0x15, 0x40, 0x40, 0x07, 0x00]).unwrap();
        assert!(acc.is_complete());

        let alarms = acc.finish().unwrap();
        assert_eq!(alarms.len(), 5);
        assert_eq!(alarms[0], Alarm::new(7, 0, true, false));
        assert_eq!(alarms[4].hour, 11);
    }

    #[test]
    fn test_accumulator_incomplete_is_error() {
        let mut acc = AlarmAccumulator::new(5);
        acc.push(&[0x15, 0x40, 0x40, 0x07, 0x00]).unwrap();
        assert!(acc.finish().is_err());
    }

    #[test]
    fn test_accumulator_four_alarm_model() {
        let mut acc = AlarmAccumulator::new(4);
        acc.push(&[0x15, 0x00, 0x40, 0x07, 0x00]).unwrap();
        acc.push(&[
            0x16, 0x00, 0x40, 0x08, 0x00, 0x00, 0x40, 0x09, 0x00, 0x00, 0x40, 0x0A, 0x00,
        ])
        .unwrap();
        assert_eq!(acc.finish().unwrap().len(), 4);
    }
}
