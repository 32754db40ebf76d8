//! Calendar layout: bookings placed on a month grid, one row per item.

use chrono::NaiveDate;

use crate::dates::{self, YearMonth};
use crate::model::*;

/// Rows for every equipment item, in inventory order. Pure; recomputed per call.
pub fn layout_month(month: YearMonth, equipment: &[Equipment], bookings: &[Booking]) -> Vec<CalendarRow> {
    let days = dates::days_in_month(month);
    equipment
        .iter()
        .map(|item| CalendarRow {
            equipment_id: item.id.clone(),
            equipment_name: item.name.clone(),
            segments: layout_row(&days, &item.id, bookings),
        })
        .collect()
}

/// Segments for one equipment row over the given day sequence, in booking order.
pub fn layout_row(days: &[NaiveDate], equipment_id: &str, bookings: &[Booking]) -> Vec<Segment> {
    let (Some(&first), Some(&last)) = (days.first(), days.last()) else {
        return Vec::new();
    };
    let window = DayRange::new(first, last);

    bookings
        .iter()
        .filter(|b| b.equipment_id == equipment_id)
        .filter_map(|b| segment(days, &window, b))
        .collect()
}

fn segment(days: &[NaiveDate], window: &DayRange, booking: &Booking) -> Option<Segment> {
    // A stored booking with end < start has no visible days.
    if booking.end_date < booking.start_date {
        return None;
    }
    let shown = booking.range().clip(window)?;
    let start_column = days.iter().position(|d| *d == shown.start)?;
    let span = shown.days();
    if span <= 0 {
        return None;
    }
    Some(Segment {
        booking_id: booking.id.clone(),
        user_name: booking.user_name.clone(),
        start_column,
        span_days: usize::try_from(span).ok()?,
    })
}
