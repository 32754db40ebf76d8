use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use crate::kvlog::KvRecord;
use crate::model::*;

use super::backend::{BOOKINGS_KEY, EQUIPMENT_KEY, KvBackend};
use super::TrackerError;

/// Everything a pool owns: the equipment list and every booking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub equipment: Vec<Equipment>,
    pub bookings: Vec<Booking>,
}

impl Ledger {
    pub fn new(equipment: Vec<Equipment>, bookings: Vec<Booking>) -> Self {
        Self { equipment, bookings }
    }

    pub fn booking(&self, id: &str) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: &str) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn equipment(&self, id: &str) -> Option<&Equipment> {
        self.equipment.iter().find(|e| e.id == id)
    }

    pub fn equipment_mut(&mut self, id: &str) -> Option<&mut Equipment> {
        self.equipment.iter_mut().find(|e| e.id == id)
    }

    /// Display name for an equipment reference; dangling ids read "Unknown".
    pub fn equipment_name(&self, id: &str) -> &str {
        self.equipment(id).map_or(UNKNOWN, |e| e.name.as_str())
    }
}

/// Which blobs a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Changed {
    pub equipment: bool,
    pub bookings: bool,
}

impl Changed {
    pub const EQUIPMENT: Changed = Changed { equipment: true, bookings: false };
    pub const BOOKINGS: Changed = Changed { equipment: false, bookings: true };
    pub const BOTH: Changed = Changed { equipment: true, bookings: true };
}

/// Serialize the touched parts of `ledger` as backend records.
pub fn encode(ledger: &Ledger, changed: Changed) -> Result<Vec<KvRecord>, TrackerError> {
    let mut records = Vec::with_capacity(2);
    if changed.equipment {
        let json = serde_json::to_string(&ledger.equipment)
            .map_err(|e| TrackerError::Persistence(e.to_string()))?;
        records.push(KvRecord::new(EQUIPMENT_KEY, json));
    }
    if changed.bookings {
        let json = serde_json::to_string(&ledger.bookings)
            .map_err(|e| TrackerError::Persistence(e.to_string()))?;
        records.push(KvRecord::new(BOOKINGS_KEY, json));
    }
    Ok(records)
}

/// Load the ledger from `backend`, reviving dates from their stored strings.
///
/// An absent equipment blob falls back to the seed equipment, an absent
/// booking blob to the seed bookings for whatever equipment was loaded. Any
/// read or decode failure discards both and starts from the full seed.
pub async fn load(backend: &dyn KvBackend, today: NaiveDate) -> Ledger {
    match try_load(backend, today).await {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!("failed to load stored data, initializing with defaults: {e}");
            seed(today)
        }
    }
}

async fn try_load(backend: &dyn KvBackend, today: NaiveDate) -> Result<Ledger, TrackerError> {
    let equipment = match backend.get(EQUIPMENT_KEY).await? {
        Some(raw) => serde_json::from_str::<Vec<Equipment>>(&raw)
            .map_err(|e| TrackerError::Persistence(format!("equipment: {e}")))?,
        None => {
            info!("no stored equipment, using seed inventory");
            seed_equipment()
        }
    };
    let bookings = match backend.get(BOOKINGS_KEY).await? {
        Some(raw) => serde_json::from_str::<Vec<Booking>>(&raw)
            .map_err(|e| TrackerError::Persistence(format!("bookings: {e}")))?,
        None => {
            info!("no stored bookings, using seed bookings");
            seed_bookings(&equipment, today)
        }
    };
    Ok(Ledger::new(equipment, bookings))
}

// ── Seed data ────────────────────────────────────────────

const SEED_EQUIPMENT: [&str; 12] = [
    "Iphone 17 Pro #1",
    "Iphone 17 Pro #2",
    "Iphone 17 Pro Max #1",
    "Iphone 17 Pro Max #2",
    "Iphone 17 Pro Max #3",
    "Iphone 17 Pro Max #4",
    "DJI Mic Pro 2 #1",
    "DJI Mic Pro 2 #2",
    "DJI P7 Gimbal #1",
    "DJI P7 Gimbal #2",
    "Light Kit #1",
    "Light Kit #2",
];

const SEED_USERS: [(&str, &str); 5] = [
    ("Alex", "alex@trim.media"),
    ("Brian", "brian@trim.media"),
    ("Casey", "casey@trim.media"),
    ("Drew", "drew@trim.media"),
    ("Elliot", "elliot@trim.media"),
];

pub fn seed(today: NaiveDate) -> Ledger {
    let equipment = seed_equipment();
    let bookings = seed_bookings(&equipment, today);
    Ledger::new(equipment, bookings)
}

pub fn seed_equipment() -> Vec<Equipment> {
    SEED_EQUIPMENT
        .iter()
        .enumerate()
        .map(|(i, name)| Equipment::new(format!("equip-{}", i + 1), *name))
        .collect()
}

fn offset(today: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        today.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        today.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(today)
}

/// Five bookings relative to `today` covering the overdue, active, future
/// and returned cases. Empty when fewer than six items exist.
pub fn seed_bookings(equipment: &[Equipment], today: NaiveDate) -> Vec<Booking> {
    if equipment.len() < 6 {
        return Vec::new();
    }
    // (equipment index, user index, start offset, end offset, checked)
    let plan: [(usize, usize, i64, i64, bool); 5] = [
        (0, 0, -8, -4, false),  // overdue
        (2, 1, -2, 3, false),   // active
        (5, 2, 5, 10, false),   // future
        (0, 3, 2, 4, false),    // future, same item as the overdue one
        (1, 4, -15, -12, true), // returned
    ];
    plan.iter()
        .enumerate()
        .map(|(i, &(item, user, start, end, checked))| {
            let (user_name, user_email) = SEED_USERS[user];
            Booking {
                id: format!("booking-{}", i + 1),
                equipment_id: equipment[item].id.clone(),
                user_name: user_name.to_string(),
                user_email: user_email.to_string(),
                start_date: offset(today, start),
                end_date: offset(today, end),
                is_checked: checked,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::MemoryBackend;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 20).unwrap()
    }

    #[test]
    fn seed_shape() {
        let ledger = seed(today());
        assert_eq!(ledger.equipment.len(), 12);
        assert_eq!(ledger.equipment[0].id, "equip-1");
        assert_eq!(ledger.equipment[11].name, "Light Kit #2");
        assert_eq!(ledger.bookings.len(), 5);

        let overdue = ledger.booking("booking-1").unwrap();
        assert_eq!(overdue.equipment_id, "equip-1");
        assert_eq!(overdue.start_date, NaiveDate::from_ymd_opt(2026, 1, 12).unwrap());
        assert_eq!(overdue.end_date, NaiveDate::from_ymd_opt(2026, 1, 16).unwrap());
        assert!(!overdue.is_checked);

        let returned = ledger.booking("booking-5").unwrap();
        assert!(returned.is_checked);
        assert_eq!(returned.equipment_id, "equip-2");
    }

    #[test]
    fn seed_bookings_need_six_items() {
        let few: Vec<Equipment> = seed_equipment().into_iter().take(5).collect();
        assert!(seed_bookings(&few, today()).is_empty());
    }

    #[test]
    fn equipment_name_falls_back() {
        let ledger = seed(today());
        assert_eq!(ledger.equipment_name("equip-3"), "Iphone 17 Pro Max #1");
        assert_eq!(ledger.equipment_name("equip-404"), UNKNOWN);
    }

    #[tokio::test]
    async fn load_empty_backend_seeds() {
        let backend = MemoryBackend::new();
        let ledger = load(&backend, today()).await;
        assert_eq!(ledger, seed(today()));
    }

    #[tokio::test]
    async fn load_roundtrips_encoded_ledger() {
        let mut ledger = seed(today());
        ledger.equipment[0].damage_history.push(DamageReport {
            date: chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 19, 10, 30, 0).unwrap(),
            description: "cracked lens".into(),
            reported_by_email: "alex@trim.media".into(),
            booking_id: "booking-1".into(),
        });
        let backend = MemoryBackend::new();
        backend.set_many(encode(&ledger, Changed::BOTH).unwrap()).await.unwrap();

        let loaded = load(&backend, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).await;
        assert_eq!(loaded, ledger);
    }

    #[tokio::test]
    async fn stored_equipment_without_bookings_uses_seed_plan() {
        let backend = MemoryBackend::with_entries([(
            EQUIPMENT_KEY,
            r#"[{"id":"cam-1","name":"Camera A","damageHistory":[]}]"#,
        )]);
        let ledger = load(&backend, today()).await;
        assert_eq!(ledger.equipment.len(), 1);
        // one item is too few for the seed plan
        assert!(ledger.bookings.is_empty());
    }

    #[tokio::test]
    async fn malformed_blob_falls_back_to_seed() {
        let backend = MemoryBackend::with_entries([
            (EQUIPMENT_KEY, "[]"),
            (BOOKINGS_KEY, "{not json"),
        ]);
        let ledger = load(&backend, today()).await;
        assert_eq!(ledger, seed(today()));
    }

    #[tokio::test]
    async fn read_failure_falls_back_to_seed() {
        let backend = MemoryBackend::new();
        backend.fail_reads(true);
        let ledger = load(&backend, today()).await;
        assert_eq!(ledger, seed(today()));
    }

    #[test]
    fn encode_only_touched_blobs() {
        let ledger = seed(today());
        let records = encode(&ledger, Changed::BOOKINGS).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, BOOKINGS_KEY);
        assert!(records[0].value.contains("\"startDate\":\"2026-01-12T00:00:00.000Z\""));
    }
}
