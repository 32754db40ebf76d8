//! UTC calendar-date helpers. Every date in the tracker is a `NaiveDate`
//! understood as a UTC calendar day; time of day never participates in a
//! comparison.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

/// The UTC calendar day a timestamp falls on.
pub fn utc_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Inclusive day count of `[start, end]`. Zero or negative when `end < start`.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// A calendar month, represented by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth(NaiveDate);

impl YearMonth {
    /// `None` for months outside `0001-01..=9999-12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1..=9999).contains(&year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().0.pred_opt().unwrap_or(self.0)
    }

    pub fn next(&self) -> Self {
        self.0
            .checked_add_months(Months::new(1))
            .map(Self)
            .unwrap_or(*self)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = String;

    /// Accepts `YYYY-MM`, or any full date inside the month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(date) = revive_date(s) {
            return Ok(Self::containing(date));
        }
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("bad month: {s} (expected YYYY-MM)"))?;
        let year: i32 = year.parse().map_err(|_| format!("bad year in month: {s}"))?;
        let month: u32 = month.parse().map_err(|_| format!("bad month: {s}"))?;
        Self::new(year, month).ok_or_else(|| format!("month out of range: {s}"))
    }
}

/// Every day of the month, day 1 through the last day.
pub fn days_in_month(month: YearMonth) -> Vec<NaiveDate> {
    let last = month.last_day();
    month
        .first_day()
        .iter_days()
        .take_while(|d| *d <= last)
        .collect()
}

/// Human label such as "January 2026".
pub fn month_label(month: YearMonth) -> String {
    month.first_day().format("%B %Y").to_string()
}

/// Parse a stored or user-supplied date. Accepts `YYYY-MM-DD` and RFC 3339
/// timestamps; a timestamp is reduced to its UTC calendar day.
pub fn revive_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc).date_naive())
}

/// Render a calendar day as a UTC-midnight ISO-8601 timestamp.
pub fn iso_midnight(date: NaiveDate) -> String {
    date.format("%Y-%m-%dT00:00:00.000Z").to_string()
}

/// Serde adapter storing a `NaiveDate` as a UTC-midnight ISO-8601 string and
/// reviving any form `revive_date` understands.
pub mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::iso_midnight(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::revive_date(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a calendar date: {raw}")))
    }
}
