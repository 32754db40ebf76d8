use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::{self, iso_date};

/// Name shown for a reference that no longer resolves.
pub const UNKNOWN: &str = "Unknown";

/// Inclusive range of UTC calendar days `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DayRange start must not be after end");
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        dates::inclusive_days(self.start, self.end)
    }

    /// Inclusive overlap: sharing a single day counts.
    pub fn overlaps(&self, other: &DayRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// The part of `self` inside `window`, if any.
    pub fn clip(&self, window: &DayRange) -> Option<DayRange> {
        if !self.overlaps(window) {
            return None;
        }
        Some(DayRange::new(
            self.start.max(window.start),
            self.end.min(window.end),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageReport {
    pub date: DateTime<Utc>,
    pub description: String,
    pub reported_by_email: String,
    pub booking_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: String,
    pub name: String,
    /// Newest first.
    #[serde(default)]
    pub damage_history: Vec<DamageReport>,
}

impl Equipment {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            damage_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub equipment_id: String,
    pub user_name: String,
    pub user_email: String,
    #[serde(with = "iso_date")]
    pub start_date: NaiveDate,
    #[serde(with = "iso_date")]
    pub end_date: NaiveDate,
    #[serde(default)]
    pub is_checked: bool,
}

impl Booking {
    pub fn range(&self) -> DayRange {
        DayRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// Create (`id == None`) or edit request for a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInput {
    pub id: Option<String>,
    pub equipment_id: String,
    pub user_name: String,
    pub user_email: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Partial edit: unset fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub equipment_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Full edit input for `current` with this patch applied.
    pub fn resolve(self, current: &Booking) -> BookingInput {
        BookingInput {
            id: Some(current.id.clone()),
            equipment_id: self.equipment_id.unwrap_or_else(|| current.equipment_id.clone()),
            user_name: self.user_name.unwrap_or_else(|| current.user_name.clone()),
            user_email: self.user_email.unwrap_or_else(|| current.user_email.clone()),
            start_date: self.start_date.unwrap_or(current.start_date),
            end_date: self.end_date.unwrap_or(current.end_date),
        }
    }
}

// ── Derived views ────────────────────────────────────────────────

/// Bookings awaiting action, recomputed from the current bookings on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queues {
    /// Past due and not checked in.
    pub overdue: Vec<Booking>,
    /// Started and not checked in. Always a superset of `overdue`.
    pub pending_inspection: Vec<Booking>,
}

/// One booking bar on a calendar row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub booking_id: String,
    pub user_name: String,
    /// Zero-based day offset within the month.
    pub start_column: usize,
    pub span_days: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRow {
    pub equipment_id: String,
    pub equipment_name: String,
    pub segments: Vec<Segment>,
}
