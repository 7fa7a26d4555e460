//! Reminder (calendar event) codec
//!
//! One reminder is split over two commands sharing a slot index:
//!
//! ```text
//! 30 NN <18 bytes ASCII title, zero padded>
//! 31 NN FREQ SY SM SD EY EM ED DOW 00
//! ```
//!
//! Dates are packed so the hex digits read as decimal (`22 04 18` is
//! 2022-04-18). A `0xFF` in the first date byte of a time record (or the
//! first title byte) marks the end of the reminder list.

use crate::types::{ascii_field, ascii_padded, hex_dump, CommandCode, GShockError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

pub const MAX_REMINDERS: usize = 5;
pub const TITLE_LEN: usize = 18;
const TIME_BODY_LEN: usize = 9;
const END_OF_LIST: u8 = 0xFF;

const ENABLED_MASK: u8 = 0b0000_0001;
const WEEKLY_MASK: u8 = 0b0000_0100;
const YEARLY_MASK: u8 = 0b0000_1000;
const MONTHLY_MASK: u8 = 0b0001_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatPeriod {
    Never,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

/// Calendar date as the watch stores it: two-digit year, month 1-12, day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl ReminderDate {
    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            year: u16::from(from_bcd(bytes[0])?) + 2000,
            month: from_bcd(bytes[1])?,
            day: from_bcd(bytes[2])?,
        })
    }

    fn encode(&self) -> Result<[u8; 3]> {
        if !(2000..2100).contains(&self.year)
            || !(1..=12).contains(&self.month)
            || !(1..=31).contains(&self.day)
        {
            return Err(GShockError::InvalidValue(format!(
                "reminder date {:04}-{:02}-{:02}",
                self.year, self.month, self.day
            )));
        }
        Ok([
            to_bcd((self.year - 2000) as u8),
            to_bcd(self.month),
            to_bcd(self.day),
        ])
    }
}

fn from_bcd(value: u8) -> Result<u8> {
    let (hi, lo) = (value >> 4, value & 0x0F);
    if hi > 9 || lo > 9 {
        return Err(GShockError::DecodingError(format!(
            "0x{:02X} is not a packed decimal date field",
            value
        )));
    }
    Ok(hi * 10 + lo)
}

fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Schedule half of a reminder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderTime {
    pub enabled: bool,
    pub repeat_period: RepeatPeriod,
    pub start_date: ReminderDate,
    pub end_date: ReminderDate,
    pub days_of_week: Vec<DayOfWeek>,
}

impl ReminderTime {
    fn empty() -> Self {
        let date = ReminderDate::new(2000, 1, 1);
        Self {
            enabled: false,
            repeat_period: RepeatPeriod::Never,
            start_date: date,
            end_date: date,
            days_of_week: Vec::new(),
        }
    }

    fn frequency_byte(&self) -> u8 {
        let mut freq = if self.enabled { ENABLED_MASK } else { 0 };
        freq |= match self.repeat_period {
            RepeatPeriod::Weekly => WEEKLY_MASK,
            RepeatPeriod::Monthly => MONTHLY_MASK,
            RepeatPeriod::Yearly => YEARLY_MASK,
            RepeatPeriod::Never => 0,
        };
        freq
    }

    fn day_of_week_byte(&self) -> u8 {
        // Only weekly reminders carry a day mask.
        if self.repeat_period != RepeatPeriod::Weekly {
            return 0;
        }
        self.days_of_week.iter().fold(0, |acc, day| acc | day.mask())
    }
}

/// A slot read from the watch: either an entry or the end-of-list marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderSlot<T> {
    Entry { index: u8, value: T },
    End { index: u8 },
}

impl<T> ReminderSlot<T> {
    pub fn index(&self) -> u8 {
        match self {
            ReminderSlot::Entry { index, .. } | ReminderSlot::End { index } => *index,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, ReminderSlot::End { .. })
    }
}

/// A reminder after joining its title and time halves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub title: String,
    pub time: ReminderTime,
}

impl Reminder {
    pub fn empty() -> Self {
        Self {
            title: String::new(),
            time: ReminderTime::empty(),
        }
    }
}

fn check_header(data: &[u8], code: CommandCode, min_len: usize, what: &'static str) -> Result<u8> {
    if data.first() != Some(&code.to_u8()) {
        return Err(GShockError::DecodingError(format!(
            "expected {} record, got {}",
            code,
            hex_dump(data)
        )));
    }
    if data.len() < min_len {
        return Err(GShockError::PacketTooShort {
            what,
            len: data.len(),
        });
    }
    Ok(data[1])
}

/// Decode a `0x30` title record
pub fn decode_title(data: &[u8]) -> Result<ReminderSlot<String>> {
    let index = check_header(data, CommandCode::ReminderTitle, 3, "reminder title")?;
    if data[2] == END_OF_LIST {
        return Ok(ReminderSlot::End { index });
    }
    Ok(ReminderSlot::Entry {
        index,
        value: ascii_field(data, 2),
    })
}

/// Decode a `0x31` time record
pub fn decode_time(data: &[u8]) -> Result<ReminderSlot<ReminderTime>> {
    let index = check_header(data, CommandCode::ReminderTime, 4, "reminder time")?;
    if data[3] == END_OF_LIST {
        return Ok(ReminderSlot::End { index });
    }
    if data.len() < 2 + TIME_BODY_LEN {
        return Err(GShockError::PacketTooShort {
            what: "reminder time",
            len: data.len(),
        });
    }

    let body = &data[2..];
    let freq = body[0];
    let repeat_period = if freq & WEEKLY_MASK != 0 {
        RepeatPeriod::Weekly
    } else if freq & MONTHLY_MASK != 0 {
        RepeatPeriod::Monthly
    } else if freq & YEARLY_MASK != 0 {
        RepeatPeriod::Yearly
    } else {
        RepeatPeriod::Never
    };

    let dow = body[7];
    let time = ReminderTime {
        enabled: freq & ENABLED_MASK != 0,
        repeat_period,
        start_date: ReminderDate::decode(&body[1..4])?,
        end_date: ReminderDate::decode(&body[4..7])?,
        days_of_week: DayOfWeek::ALL
            .into_iter()
            .filter(|day| dow & day.mask() != 0)
            .collect(),
    };
    debug!("Decoded reminder time {}: {:?}", index, time);
    Ok(ReminderSlot::Entry { index, value: time })
}

/// Join the two halves of one reminder slot
///
/// Either half being the end marker makes the joined slot the end marker.
pub fn join(
    title: ReminderSlot<String>,
    time: ReminderSlot<ReminderTime>,
) -> Result<ReminderSlot<Reminder>> {
    if title.index() != time.index() {
        return Err(GShockError::DecodingError(format!(
            "reminder title {} does not match time {}",
            title.index(),
            time.index()
        )));
    }
    match (title, time) {
        (
            ReminderSlot::Entry {
                index,
                value: title,
            },
            ReminderSlot::Entry { value: time, .. },
        ) => Ok(ReminderSlot::Entry {
            index,
            value: Reminder { title, time },
        }),
        (title, _) => Ok(ReminderSlot::End {
            index: title.index(),
        }),
    }
}

pub fn encode_title(index: u8, title: &str) -> Vec<u8> {
    let mut out = vec![CommandCode::ReminderTitle.to_u8(), index];
    out.extend(ascii_padded(title, TITLE_LEN));
    out
}

pub fn encode_time(index: u8, time: &ReminderTime) -> Result<Vec<u8>> {
    let mut out = vec![CommandCode::ReminderTime.to_u8(), index, time.frequency_byte()];
    out.extend_from_slice(&time.start_date.encode()?);
    out.extend_from_slice(&time.end_date.encode()?);
    out.push(time.day_of_week_byte());
    out.push(0);
    Ok(out)
}

/// Order reminders for writing: enabled first, then disabled, truncated or
/// padded with empty reminders to exactly [`MAX_REMINDERS`]
pub fn arrange_for_watch(reminders: &[Reminder]) -> Vec<Reminder> {
    let mut ordered: Vec<Reminder> = reminders
        .iter()
        .filter(|r| r.time.enabled)
        .chain(reminders.iter().filter(|r| !r.time.enabled))
        .take(MAX_REMINDERS)
        .cloned()
        .collect();
    ordered.resize_with(MAX_REMINDERS, Reminder::empty);
    ordered
}

/// Zeroed title and time records that erase one slot
pub fn encode_clear(index: u8) -> (Vec<u8>, Vec<u8>) {
    let mut title = vec![CommandCode::ReminderTitle.to_u8(), index];
    title.extend([0u8; TITLE_LEN]);
    let mut time = vec![CommandCode::ReminderTime.to_u8(), index];
    time.extend([0u8; TIME_BODY_LEN]);
    (title, time)
}
