use chrono::NaiveDate;

use crate::limits::MAX_LOAN_DAYS;
use crate::model::*;

use super::TrackerError;

/// A date range someone wants to reserve.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub equipment_id: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Booking to ignore, i.e. the one being edited.
    pub exclude_id: Option<&'a str>,
}

impl<'a> Candidate<'a> {
    pub fn new(equipment_id: &'a str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            equipment_id,
            start_date,
            end_date,
            exclude_id: None,
        }
    }

    pub fn excluding(mut self, id: Option<&'a str>) -> Self {
        self.exclude_id = id;
        self
    }

    fn range(&self) -> DayRange {
        DayRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// First booking on the same equipment whose inclusive range overlaps the
/// candidate. Checked and unchecked bookings both count.
pub fn find_conflict<'b>(candidate: &Candidate<'_>, existing: &'b [Booking]) -> Option<&'b Booking> {
    let range = candidate.range();
    existing.iter().find(|b| {
        b.equipment_id == candidate.equipment_id
            && candidate.exclude_id != Some(b.id.as_str())
            && range.overlaps(&b.range())
    })
}

pub fn has_conflict(candidate: &Candidate<'_>, existing: &[Booking]) -> bool {
    find_conflict(candidate, existing).is_some()
}

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), TrackerError> {
    if end < start {
        return Err(TrackerError::Validation(
            "End date cannot be before start date.".into(),
        ));
    }
    if DayRange::new(start, end).days() > MAX_LOAN_DAYS {
        return Err(TrackerError::LimitExceeded("loan too long"));
    }
    Ok(())
}
