//! Unit-aware datetime and duration types for the temporal axis.

use chrono::{Datelike, NaiveDateTime};
use std::fmt;

/// The unit a temporal step is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Day,
    Month,
    Year,
}

impl TimeUnit {
    /// Parse the unit strings accepted in an STRef description.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "second" | "seconds" => Some(TimeUnit::Second),
            "day" | "days" => Some(TimeUnit::Day),
            "month" | "months" => Some(TimeUnit::Month),
            "year" | "years" => Some(TimeUnit::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Day => "day",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A temporal step: a count of whole units.
///
/// `Month` is one calendar month via checked month arithmetic and
/// `Year` is twelve calendar months, rather than a fixed day count,
/// matching a unit-aware temporal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub unit: TimeUnit,
    pub amount: i64,
}

impl Duration {
    pub fn new(unit: TimeUnit, amount: i64) -> Self {
        Duration { unit, amount }
    }

    /// The step expressed in whole seconds, for units where that is
    /// well defined (`Second`, `Day`). Calendar-based units
    /// (`Month`, `Year`) have no fixed second count and return `None`.
    fn as_seconds(&self) -> Option<i64> {
        match self.unit {
            TimeUnit::Second => Some(self.amount),
            TimeUnit::Day => Some(self.amount * 86_400),
            TimeUnit::Month | TimeUnit::Year => None,
        }
    }

    /// The step expressed in whole calendar months, for units where
    /// that is well defined (`Month`, `Year`).
    fn as_months(&self) -> Option<i64> {
        match self.unit {
            TimeUnit::Month => Some(self.amount),
            TimeUnit::Year => Some(self.amount * 12),
            TimeUnit::Second | TimeUnit::Day => None,
        }
    }
}

/// A point in time, unit-agnostic; arithmetic against a [`Duration`]
/// interprets the duration's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub NaiveDateTime);

impl DateTime {
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        DateTime(dt)
    }

    /// `self + n * step`, where `step` may be a calendar unit.
    /// Returns `None` on calendar overflow.
    pub fn checked_add(&self, step: &Duration, n: i64) -> Option<DateTime> {
        if let Some(months) = step.as_months() {
            add_months(self.0, months * n).map(DateTime)
        } else {
            let secs = step.as_seconds()? * n;
            self.0.checked_add_signed(chrono::Duration::seconds(secs)).map(DateTime)
        }
    }

    /// `(self - other) / step`, truncated toward zero, as required by
    /// the time-index computation for a chunk's local offset along the
    /// time axis. The division is carried out in whichever unit
    /// `step` is expressed in: calendar months for `Month`/`Year`,
    /// whole seconds for `Second`/`Day`.
    pub fn offset_in(&self, other: &DateTime, step: &Duration) -> i64 {
        if let Some(months) = step.as_months() {
            let delta = months_between(other.0, self.0);
            delta / months
        } else {
            let secs = self.0.signed_duration_since(other.0).num_seconds();
            secs / step.as_seconds().unwrap()
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S"))
    }
}

/// Whole calendar months from `from` to `to`, truncating the
/// remaining day/time-of-day fraction (a coarser-unit difference
/// truncates the finer fields).
fn months_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    let mut months = (to.year() as i64 - from.year() as i64) * 12
        + (to.month() as i64 - from.month() as i64);
    // If `to` hasn't reached the day-of-month/time-of-day of `from`
    // yet within its current month, the last whole step hasn't
    // elapsed.
    if to.day() < from.day()
        || (to.day() == from.day() && to.time() < from.time())
    {
        months -= 1;
    }
    months
}

fn add_months(dt: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let total = dt.year() as i64 * 12 + (dt.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    let day = dt.day();
    // Clamp to the last valid day of the target month rather than
    // overflowing into the next one.
    for d in (1..=day).rev() {
        if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, d) {
            return Some(date.and_time(dt.time()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    #[test]
    fn offset_in_seconds() {
        let a = dt(2020, 1, 1);
        let b = dt(2020, 1, 2);
        let step = Duration::new(TimeUnit::Day, 1);
        assert_eq!(b.offset_in(&a, &step), 1);
    }

    #[test]
    fn offset_in_months() {
        let a = dt(2020, 1, 15);
        let b = dt(2020, 4, 10);
        let step = Duration::new(TimeUnit::Month, 1);
        // Less than 3 full months have elapsed (day 10 < day 15).
        assert_eq!(b.offset_in(&a, &step), 2);
    }

    #[test]
    fn add_months_clamps_day() {
        let jan31 = dt(2021, 1, 31);
        let step = Duration::new(TimeUnit::Month, 1);
        let next = jan31.checked_add(&step, 1).unwrap();
        assert_eq!(next.0.month(), 2);
        assert_eq!(next.0.day(), 28);
    }
}
