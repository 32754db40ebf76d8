use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{Candidate, find_conflict, validate_range};
use super::store::{Changed, Ledger};
use super::{Tracker, TrackerError};

const REQUIRED_FIELDS: &str = "All fields are required.";

fn validate_input(input: &BookingInput) -> Result<(), TrackerError> {
    if input.equipment_id.trim().is_empty()
        || input.user_name.trim().is_empty()
        || input.user_email.trim().is_empty()
    {
        return Err(TrackerError::Validation(REQUIRED_FIELDS.into()));
    }
    if input.user_name.len() > MAX_NAME_LEN {
        return Err(TrackerError::LimitExceeded("user name too long"));
    }
    if input.user_email.len() > MAX_EMAIL_LEN {
        return Err(TrackerError::LimitExceeded("user email too long"));
    }
    validate_range(input.start_date, input.end_date)
}

fn validate_equipment_name(name: &str) -> Result<String, TrackerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TrackerError::Validation("Equipment name cannot be empty.".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(TrackerError::LimitExceeded("equipment name too long"));
    }
    Ok(name.to_string())
}

/// Result of [`stage_save`]: the ledger to commit and the booking as saved.
struct Staged {
    next: Ledger,
    saved: Booking,
    created: bool,
}

/// Validate and apply `input` to a copy of `ledger`. Conflicts are checked
/// against `ledger`, which is the latest committed state.
fn stage_save(ledger: &Ledger, input: BookingInput) -> Result<Staged, TrackerError> {
    validate_input(&input)?;

    let candidate = Candidate::new(&input.equipment_id, input.start_date, input.end_date)
        .excluding(input.id.as_deref());
    if let Some(existing) = find_conflict(&candidate, &ledger.bookings) {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        tracing::warn!(
            "booking conflict on {} for {}..{}: overlaps {}",
            input.equipment_id,
            input.start_date,
            input.end_date,
            existing.id
        );
        return Err(TrackerError::Conflict {
            booking_id: existing.id.clone(),
        });
    }

    let mut next = ledger.clone();
    match input.id {
        Some(id) => {
            let booking = next
                .booking_mut(&id)
                .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
            booking.equipment_id = input.equipment_id;
            booking.user_name = input.user_name;
            booking.user_email = input.user_email;
            booking.start_date = input.start_date;
            booking.end_date = input.end_date;
            let saved = booking.clone();
            Ok(Staged { next, saved, created: false })
        }
        None => {
            if next.bookings.len() >= MAX_BOOKINGS_PER_POOL {
                return Err(TrackerError::LimitExceeded("too many bookings"));
            }
            let saved = Booking {
                id: Ulid::new().to_string(),
                equipment_id: input.equipment_id,
                user_name: input.user_name,
                user_email: input.user_email,
                start_date: input.start_date,
                end_date: input.end_date,
                is_checked: false,
            };
            next.bookings.push(saved.clone());
            Ok(Staged { next, saved, created: true })
        }
    }
}

/// Mark `id` returned in `ledger`, clamping an early return's end to `today`.
/// The end never moves before the start, so a loan returned before it began
/// keeps a one-day range.
fn stage_approve(ledger: &mut Ledger, id: &str, today: chrono::NaiveDate) -> bool {
    let Some(booking) = ledger.booking_mut(id) else {
        return false;
    };
    booking.is_checked = true;
    if today < booking.end_date {
        booking.end_date = today.max(booking.start_date);
    }
    true
}

impl Tracker {
    /// Create (`input.id == None`) or edit a booking.
    pub async fn save_booking(&self, input: BookingInput) -> Result<Booking, TrackerError> {
        let mut ledger = self.ledger.lock().await;
        let staged = stage_save(&ledger, input)?;
        self.persist_and_apply(&mut ledger, staged.next, Changed::BOOKINGS)
            .await?;
        if staged.created {
            tracing::info!(
                "booking {} created: {} for {} ({}..{})",
                staged.saved.id,
                staged.saved.equipment_id,
                staged.saved.user_name,
                staged.saved.start_date,
                staged.saved.end_date
            );
        } else {
            tracing::info!("booking {} updated", staged.saved.id);
        }
        Ok(staged.saved)
    }

    /// Apply a partial edit to booking `id`. An empty patch returns it as is.
    pub async fn amend_booking(&self, id: &str, patch: BookingPatch) -> Result<Booking, TrackerError> {
        let mut ledger = self.ledger.lock().await;
        let current = ledger
            .booking(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        if patch.is_empty() {
            return Ok(current.clone());
        }
        let input = patch.resolve(current);
        let staged = stage_save(&ledger, input)?;
        self.persist_and_apply(&mut ledger, staged.next, Changed::BOOKINGS)
            .await?;
        tracing::info!("booking {id} amended");
        Ok(staged.saved)
    }

    /// Remove booking `id`. Returns whether anything was removed.
    pub async fn delete_booking(&self, id: &str) -> Result<bool, TrackerError> {
        let mut ledger = self.ledger.lock().await;
        if ledger.booking(id).is_none() {
            tracing::debug!("delete of unknown booking {id} ignored");
            return Ok(false);
        }
        let mut next = ledger.clone();
        next.bookings.retain(|b| b.id != id);
        self.persist_and_apply(&mut ledger, next, Changed::BOOKINGS).await?;
        tracing::info!("booking {id} deleted");
        Ok(true)
    }

    /// Check a booking back in. Returns `false` for an unknown id.
    pub async fn approve_return(&self, id: &str) -> Result<bool, TrackerError> {
        let mut ledger = self.ledger.lock().await;
        let mut next = ledger.clone();
        if !stage_approve(&mut next, id, self.today()) {
            tracing::debug!("approve of unknown booking {id} ignored");
            return Ok(false);
        }
        self.persist_and_apply(&mut ledger, next, Changed::BOOKINGS).await?;
        tracing::info!("booking {id} returned");
        Ok(true)
    }

    /// Record damage against the booking's equipment and check the booking in.
    /// Returns `false` without touching anything for a blank description or
    /// an unknown booking.
    pub async fn report_damage(&self, booking_id: &str, description: &str) -> Result<bool, TrackerError> {
        let description = description.trim();
        if description.is_empty() {
            tracing::debug!("empty damage report for {booking_id} ignored");
            return Ok(false);
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(TrackerError::LimitExceeded("damage description too long"));
        }

        let mut ledger = self.ledger.lock().await;
        let Some(booking) = ledger.booking(booking_id).cloned() else {
            tracing::debug!("damage report for unknown booking {booking_id} ignored");
            return Ok(false);
        };

        let mut next = ledger.clone();
        if let Some(item) = next.equipment_mut(&booking.equipment_id) {
            let report = DamageReport {
                date: self.now(),
                description: description.to_string(),
                reported_by_email: booking.user_email.clone(),
                booking_id: booking.id.clone(),
            };
            item.damage_history.insert(0, report);
        } else {
            tracing::warn!(
                "booking {booking_id} references missing equipment {}, damage not recorded",
                booking.equipment_id
            );
        }
        stage_approve(&mut next, booking_id, self.today());

        self.persist_and_apply(&mut ledger, next, Changed::BOTH).await?;
        tracing::info!(
            "damage reported on {} by {} (booking {booking_id})",
            booking.equipment_id,
            booking.user_email
        );
        Ok(true)
    }

    pub async fn rename_equipment(&self, id: &str, name: &str) -> Result<Equipment, TrackerError> {
        let name = validate_equipment_name(name)?;
        let mut ledger = self.ledger.lock().await;
        let mut next = ledger.clone();
        let item = next
            .equipment_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        item.name = name;
        let renamed = item.clone();
        self.persist_and_apply(&mut ledger, next, Changed::EQUIPMENT).await?;
        tracing::info!("equipment {id} renamed to {}", renamed.name);
        Ok(renamed)
    }

    pub async fn add_equipment(&self, id: &str, name: &str) -> Result<Equipment, TrackerError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(TrackerError::Validation("Equipment id cannot be empty.".into()));
        }
        if id.len() > MAX_NAME_LEN {
            return Err(TrackerError::LimitExceeded("equipment id too long"));
        }
        let name = validate_equipment_name(name)?;

        let mut ledger = self.ledger.lock().await;
        if ledger.equipment.len() >= MAX_EQUIPMENT_PER_POOL {
            return Err(TrackerError::LimitExceeded("too many equipment items"));
        }
        if ledger.equipment(id).is_some() {
            return Err(TrackerError::Validation(format!("Equipment {id} already exists.")));
        }
        let item = Equipment::new(id, name);
        let mut next = ledger.clone();
        next.equipment.push(item.clone());
        self.persist_and_apply(&mut ledger, next, Changed::EQUIPMENT).await?;
        tracing::info!("equipment {id} added: {}", item.name);
        Ok(item)
    }
}
