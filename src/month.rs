// Calendar months as YYYYMM tokens, inclusive month ranges and the
// "last full month" anchor used when no range is configured.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::MonthError;

/// One reporting period, e.g. `202401`.
///
/// Field order gives the derived `Ord` chronological meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthToken {
    year: i32,
    month: u32,
}

impl MonthToken {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthError> {
        if !(1..=12).contains(&month) {
            return Err(MonthError::MonthOutOfRange { year, month });
        }
        Ok(Self { year, month })
    }

    /// Builds a token from a six digit `YYYYMM` number.
    pub fn from_yyyymm(value: u32) -> Result<Self, MonthError> {
        if !(100_000..=999_999).contains(&value) {
            return Err(MonthError::Malformed(value.to_string()));
        }
        Self::new((value / 100) as i32, value % 100)
    }

    pub fn from_date<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn as_yyyymm(&self) -> u32 {
        self.year as u32 * 100 + self.month
    }

    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn pred(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// Number of months from `self` to `later`; negative if `later` is earlier.
    fn months_until(&self, later: &Self) -> i64 {
        (later.year as i64 - self.year as i64) * 12 + later.month as i64 - self.month as i64
    }
}

impl fmt::Display for MonthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for MonthToken {
    type Err = MonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MonthError::Malformed(s.to_string()));
        }
        let value: u32 = trimmed
            .parse()
            .map_err(|_| MonthError::Malformed(s.to_string()))?;
        Self::from_yyyymm(value)
    }
}

impl TryFrom<String> for MonthToken {
    type Error = MonthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthToken> for String {
    fn from(token: MonthToken) -> Self {
        token.to_string()
    }
}

/// Inclusive range of months. `Copy`, so it can be iterated any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    start: MonthToken,
    end: MonthToken,
}

impl MonthRange {
    pub fn new(start: MonthToken, end: MonthToken) -> Result<Self, MonthError> {
        if start > end {
            return Err(MonthError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(month: MonthToken) -> Self {
        Self { start: month, end: month }
    }

    pub fn start(&self) -> MonthToken {
        self.start
    }

    pub fn end(&self) -> MonthToken {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.start.months_until(&self.end) + 1) as usize
    }

    pub fn iter(&self) -> MonthIter {
        MonthIter {
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl IntoIterator for MonthRange {
    type Item = MonthToken;
    type IntoIter = MonthIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &MonthRange {
    type Item = MonthToken;
    type IntoIter = MonthIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct MonthIter {
    next: Option<MonthToken>,
    end: MonthToken,
}

impl Iterator for MonthIter {
    type Item = MonthToken;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = (current < self.end).then(|| current.succ());
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .next
            .map_or(0, |next| (next.months_until(&self.end) + 1) as usize);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MonthIter {}

/// The month before the one containing `now`, as observed in `zone`.
///
/// Schedulers fire in whatever zone their host runs in; anchoring on a fixed
/// zone keeps the default month the same everywhere.
pub fn last_full_month(now: DateTime<Utc>, zone: Tz) -> MonthToken {
    let local = zone.from_utc_datetime(&now.naive_utc());
    MonthToken::from_date(&local.date_naive()).pred()
}
