mod backend;
mod conflict;
mod error;
mod layout;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use backend::{BOOKINGS_KEY, EQUIPMENT_KEY, KvBackend, LogBackend, MemoryBackend};
pub use conflict::{Candidate, find_conflict, has_conflict, validate_range};
pub use error::{CONFLICT_MESSAGE, TrackerError};
pub use layout::{layout_month, layout_row};
pub use queries::{ReminderRequest, derive_queues};
pub use store::{Ledger, seed, seed_bookings, seed_equipment};

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use store::{Changed, encode};

/// Source of "now" for return clamping, queue derivation and damage stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Today as a UTC calendar day.
    fn today(&self) -> NaiveDate {
        crate::dates::utc_day(self.now())
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays.
pub struct FixedClock(StdMutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(StdMutex::new(now))
    }

    /// Midnight UTC of `day`.
    pub fn at_day(day: NaiveDate) -> Self {
        Self::new(day.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.0.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// One equipment pool: its ledger, the backend it persists to, and a clock.
///
/// Every operation holds the ledger lock for its full duration, so a
/// conflict check always sees the latest committed bookings and mutations
/// apply in a single total order.
pub struct Tracker {
    ledger: Mutex<Ledger>,
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    /// Load the ledger from `backend`, falling back to seed data. Never fails.
    pub async fn open(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>) -> Self {
        let ledger = store::load(backend.as_ref(), clock.today()).await;
        tracing::info!(
            "tracker loaded: {} equipment, {} bookings",
            ledger.equipment.len(),
            ledger.bookings.len()
        );
        Self {
            ledger: Mutex::new(ledger),
            backend,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Persist the touched blobs of `next`, then make it the current ledger.
    /// On a backend error the current ledger is left as it was.
    pub(super) async fn persist_and_apply(
        &self,
        current: &mut Ledger,
        next: Ledger,
        changed: Changed,
    ) -> Result<(), TrackerError> {
        let records = encode(&next, changed)?;
        if let Err(e) = self.backend.set_many(records).await {
            tracing::error!("failed to persist ledger: {e}");
            return Err(e);
        }
        *current = next;
        Ok(())
    }

    pub async fn compact_log(&self) -> Result<(), TrackerError> {
        self.backend.compact().await
    }

    pub async fn log_appends_since_compact(&self) -> u64 {
        self.backend.appends_since_compact().await
    }
}
