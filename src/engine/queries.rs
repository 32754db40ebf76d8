use chrono::NaiveDate;

use crate::dates::YearMonth;
use crate::model::*;

use super::layout::layout_month;
use super::Tracker;

/// Fallback equipment name used in reminder prompts.
const UNKNOWN_EQUIPMENT: &str = "Unknown Equipment";

/// Overdue and pending-inspection sets, in booking order.
///
/// Overdue: ended before `today` and not checked in. Pending inspection:
/// started on or before `today` and not checked in, so every overdue booking
/// is also pending inspection.
pub fn derive_queues(bookings: &[Booking], today: NaiveDate) -> Queues {
    let mut queues = Queues::default();
    for b in bookings.iter().filter(|b| !b.is_checked) {
        if b.end_date < today {
            queues.overdue.push(b.clone());
        }
        if b.start_date <= today {
            queues.pending_inspection.push(b.clone());
        }
    }
    queues
}

/// Everything the reminder generator needs for one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub booking_id: String,
    pub equipment_name: String,
    pub user_email: String,
    pub due_date: NaiveDate,
}

impl Tracker {
    pub async fn equipment(&self) -> Vec<Equipment> {
        self.ledger.lock().await.equipment.clone()
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.ledger.lock().await.bookings.clone()
    }

    /// Bookings for one equipment item, in booking order.
    pub async fn bookings_for(&self, equipment_id: &str) -> Vec<Booking> {
        let ledger = self.ledger.lock().await;
        ledger
            .bookings
            .iter()
            .filter(|b| b.equipment_id == equipment_id)
            .cloned()
            .collect()
    }

    pub async fn booking(&self, id: &str) -> Option<Booking> {
        self.ledger.lock().await.booking(id).cloned()
    }

    /// Damage reports for an item, newest first. Empty for an unknown id.
    pub async fn damage_history(&self, equipment_id: &str) -> Vec<DamageReport> {
        let ledger = self.ledger.lock().await;
        ledger
            .equipment(equipment_id)
            .map(|e| e.damage_history.clone())
            .unwrap_or_default()
    }

    pub async fn equipment_name(&self, id: &str) -> String {
        self.ledger.lock().await.equipment_name(id).to_string()
    }

    pub async fn queues(&self) -> Queues {
        let ledger = self.ledger.lock().await;
        derive_queues(&ledger.bookings, self.today())
    }

    pub async fn calendar(&self, month: YearMonth) -> Vec<CalendarRow> {
        let ledger = self.ledger.lock().await;
        layout_month(month, &ledger.equipment, &ledger.bookings)
    }

    /// Inputs for an overdue reminder, or `None` for an unknown booking.
    pub async fn reminder_request(&self, booking_id: &str) -> Option<ReminderRequest> {
        let ledger = self.ledger.lock().await;
        let booking = ledger.booking(booking_id)?;
        let equipment_name = ledger
            .equipment(&booking.equipment_id)
            .map_or(UNKNOWN_EQUIPMENT, |e| e.name.as_str())
            .to_string();
        Some(ReminderRequest {
            booking_id: booking.id.clone(),
            equipment_name,
            user_email: booking.user_email.clone(),
            due_date: booking.end_date,
        })
    }
}
