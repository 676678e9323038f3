//! Date/time wire forms.
//!
//! Both forms count whole days from 1900-01-01:
//!
//! - `datetime` (8 bytes): days (i32), then 1/300-second ticks past midnight (u32)
//! - `smalldatetime` (4 bytes): days (u16), then minutes past midnight (u16)

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::TypeError;

/// Ticks per second in the 8-byte form.
pub const TICKS_PER_SECOND: u64 = 300;

const SECONDS_PER_DAY: u64 = 86_400;
const TICKS_PER_DAY: u64 = SECONDS_PER_DAY * TICKS_PER_SECOND;
const MINUTES_PER_DAY: u16 = 1_440;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// 1900-01-01 00:00:00.
#[must_use]
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

/// Raw 8-byte date/time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime8 {
    /// Days since the epoch.
    pub days: i32,
    /// 1/300-second ticks past midnight.
    pub ticks: u32,
}

/// Raw 4-byte date/time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime4 {
    /// Days since the epoch.
    pub days: u16,
    /// Minutes past midnight.
    pub minutes: u16,
}

impl DateTime8 {
    /// Convert to a calendar value.
    pub fn to_naive(self) -> Result<NaiveDateTime, TypeError> {
        if u64::from(self.ticks) >= TICKS_PER_DAY {
            return Err(TypeError::InvalidDateTime(format!(
                "{} ticks past midnight",
                self.ticks
            )));
        }
        let nanos = (u64::from(self.ticks) * NANOS_PER_SECOND + TICKS_PER_SECOND / 2)
            / TICKS_PER_SECOND;
        epoch()
            .checked_add_signed(Duration::days(i64::from(self.days)))
            .and_then(|d| d.checked_add_signed(Duration::nanoseconds(nanos as i64)))
            .ok_or_else(|| TypeError::InvalidDateTime(format!("{} days from 1900", self.days)))
    }

    /// Convert from a calendar value, rounding to the nearest tick.
    pub fn from_naive(value: NaiveDateTime) -> Result<Self, TypeError> {
        let date = value.date().and_time(NaiveTime::MIN);
        let mut days = (date - epoch()).num_days();
        let since_midnight = u64::from(value.num_seconds_from_midnight()) * NANOS_PER_SECOND
            + u64::from(value.nanosecond() % 1_000_000_000);
        let mut ticks =
            (since_midnight * TICKS_PER_SECOND + NANOS_PER_SECOND / 2) / NANOS_PER_SECOND;
        if ticks >= TICKS_PER_DAY {
            ticks -= TICKS_PER_DAY;
            days += 1;
        }
        let days = i32::try_from(days).map_err(|_| TypeError::OutOfRange {
            target_type: "datetime",
        })?;
        Ok(Self {
            days,
            ticks: ticks as u32,
        })
    }
}

impl DateTime4 {
    /// Convert to a calendar value.
    pub fn to_naive(self) -> Result<NaiveDateTime, TypeError> {
        if self.minutes >= MINUTES_PER_DAY {
            return Err(TypeError::InvalidDateTime(format!(
                "{} minutes past midnight",
                self.minutes
            )));
        }
        epoch()
            .checked_add_signed(Duration::days(i64::from(self.days)))
            .and_then(|d| d.checked_add_signed(Duration::minutes(i64::from(self.minutes))))
            .ok_or_else(|| TypeError::InvalidDateTime(format!("{} days from 1900", self.days)))
    }

    /// Convert from a calendar value, rounding to the nearest minute.
    pub fn from_naive(value: NaiveDateTime) -> Result<Self, TypeError> {
        let date = value.date().and_time(NaiveTime::MIN);
        let mut days = (date - epoch()).num_days();
        let seconds = value.num_seconds_from_midnight();
        let mut minutes = (seconds + 30) / 60;
        if minutes >= u32::from(MINUTES_PER_DAY) {
            minutes -= u32::from(MINUTES_PER_DAY);
            days += 1;
        }
        let days = u16::try_from(days).map_err(|_| TypeError::OutOfRange {
            target_type: "smalldatetime",
        })?;
        Ok(Self {
            days,
            minutes: minutes as u16,
        })
    }
}
