// Copyright © 2024 Pathway

use std::fmt::{self, Display};

use chrono::{self, DurationRound, LocalResult, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::{Error, Result};

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

#[allow(clippy::module_name_repetitions)]
pub trait DateTime {
    fn timestamp(&self) -> i64;

    fn as_chrono_datetime(&self) -> chrono::NaiveDateTime {
        chrono::DateTime::from_timestamp_nanos(self.timestamp()).naive_utc()
    }

    /// Splits the timestamp into whole `unit`s and the nanoseconds that do not fit.
    fn timestamp_in_unit(&self, unit: &str) -> Result<(i64, i64)> {
        let mult = get_unit_multiplier(unit)?;
        let timestamp = self.timestamp();
        Ok((timestamp.div_euclid(mult), timestamp.rem_euclid(mult)))
    }

    fn strftime(&self, format: &str) -> String;
}

pub fn get_unit_multiplier(unit: &str) -> Result<i64> {
    match unit {
        "s" => Ok(1_000_000_000),
        "ms" => Ok(1_000_000),
        "us" => Ok(1_000),
        "ns" => Ok(1),
        _ => Err(Error::ValueError(format!(
            "unit has to be one of s, ms, us, ns but is {unit:?}"
        ))),
    }
}

pub fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|e| Error::ParseError(format!("cannot parse time zone {timezone:?}: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTimeNaive {
    timestamp: i64,
}

impl DateTimeNaive {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    pub fn from_timestamp(timestamp: i64, unit: &str) -> Result<Self> {
        let mult = get_unit_multiplier(unit)?;
        timestamp
            .checked_mul(mult)
            .map(Self::new)
            .ok_or(Error::DateTimeConversionError)
    }

    pub fn from_days(days: i32) -> Self {
        Self::new(i64::from(days) * NANOS_PER_DAY)
    }

    /// Whole days since the epoch, rounding towards the past.
    pub fn days(&self) -> i64 {
        self.timestamp.div_euclid(NANOS_PER_DAY)
    }

    pub fn to_utc_from_timezone(&self, tz: Tz) -> Result<DateTimeUtc> {
        let naive_local = self.as_chrono_datetime();
        match tz.from_local_datetime(&naive_local) {
            LocalResult::Single(localized) | LocalResult::Ambiguous(_, localized) => {
                DateTimeUtc::try_from_chrono(&localized)
            }
            LocalResult::None => {
                // The wall time falls into a DST gap, take the first valid hour after it.
                let moved = naive_local + chrono::Duration::minutes(30);
                let rounded = moved
                    .duration_round(chrono::Duration::hours(1))
                    .map_err(|_| Error::DateTimeConversionError)?;
                match tz.from_local_datetime(&rounded) {
                    LocalResult::Single(localized) => DateTimeUtc::try_from_chrono(&localized),
                    _ => Err(Error::DateTimeConversionError),
                }
            }
        }
    }
}

impl DateTime for DateTimeNaive {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn strftime(&self, format: &str) -> String {
        self.as_chrono_datetime().format(format).to_string()
    }
}

impl Display for DateTimeNaive {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.strftime("%Y-%m-%dT%H:%M:%S%.9f"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTimeUtc {
    timestamp: i64,
}

impl DateTimeUtc {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    pub fn from_timestamp(timestamp: i64, unit: &str) -> Result<Self> {
        let mult = get_unit_multiplier(unit)?;
        timestamp
            .checked_mul(mult)
            .map(Self::new)
            .ok_or(Error::DateTimeConversionError)
    }

    fn try_from_chrono<T: TimeZone>(value: &chrono::DateTime<T>) -> Result<Self> {
        value
            .timestamp_nanos_opt()
            .map(Self::new)
            .ok_or(Error::DateTimeConversionError)
    }

    pub fn to_naive_in_timezone(&self, tz: Tz) -> DateTimeNaive {
        let naive_utc = self.as_chrono_datetime();
        let localized = tz.from_utc_datetime(&naive_utc);
        DateTimeNaive::new(
            localized
                .naive_local()
                .and_utc()
                .timestamp_nanos_opt()
                .unwrap_or(self.timestamp),
        )
    }
}

impl DateTime for DateTimeUtc {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn strftime(&self, format: &str) -> String {
        chrono::Utc
            .timestamp_nanos(self.timestamp)
            .format(format)
            .to_string()
    }
}

impl Display for DateTimeUtc {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.strftime("%Y-%m-%dT%H:%M:%S%.9f%z"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration {
    duration: i64,
}

impl Duration {
    pub fn new(duration: i64) -> Self {
        Self { duration }
    }

    pub fn new_with_unit(duration: i64, unit: &str) -> Result<Self> {
        duration
            .checked_mul(get_unit_multiplier(unit)?)
            .map(Self::new)
            .ok_or(Error::DateTimeConversionError)
    }

    pub fn nanoseconds(&self) -> i64 {
        self.duration
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.duration.checked_add(other.duration).map(Self::new)
    }

    /// Splits the duration into whole `unit`s and the nanoseconds that do not fit.
    pub fn in_unit(&self, unit: &str) -> Result<(i64, i64)> {
        let mult = get_unit_multiplier(unit)?;
        Ok((self.duration.div_euclid(mult), self.duration.rem_euclid(mult)))
    }
}


impl Display for Duration {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let timeunits = [
            (1_000_000_000 * 60 * 60 * 24, "d"),
            (1_000_000_000 * 60 * 60, "h"),
            (1_000_000_000 * 60, "m"),
            (1_000_000_000, "s"),
            (1, "ns"),
        ];
        let mut output = vec![];
        let mut remaining_nanoseconds = self.duration;
        for (num_nanoseconds, unit_name) in timeunits {
            if remaining_nanoseconds / num_nanoseconds != 0 {
                output.push(format!(
                    "{}{}",
                    remaining_nanoseconds / num_nanoseconds,
                    unit_name
                ));
                remaining_nanoseconds %= num_nanoseconds;
            }
        }
        if output.is_empty() {
            return write!(fmt, "0ns");
        }
        write!(fmt, "{}", output.join(" "))
    }
}
