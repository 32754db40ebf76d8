use super::*;
use crate::dates::YearMonth;
use crate::model::*;

use std::path::PathBuf;

const CAMERA: &str = r#"[{"id":"cam-a","name":"Camera A","damageHistory":[]},
    {"id":"mic-1","name":"DJI Mic Pro 2 #1","damageHistory":[]}]"#;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
}

/// Tracker over two items and no bookings, with today fixed at Jan 20 2026.
async fn camera_tracker() -> (Tracker, Arc<MemoryBackend>, Arc<FixedClock>) {
    let backend = Arc::new(MemoryBackend::with_entries([
        (EQUIPMENT_KEY, CAMERA),
        (BOOKINGS_KEY, "[]"),
    ]));
    let clock = Arc::new(FixedClock::at_day(d(20)));
    let tracker = Tracker::open(backend.clone(), clock.clone()).await;
    (tracker, backend, clock)
}

fn input(equipment_id: &str, start: NaiveDate, end: NaiveDate) -> BookingInput {
    BookingInput {
        id: None,
        equipment_id: equipment_id.into(),
        user_name: "Alex".into(),
        user_email: "alex@trim.media".into(),
        start_date: start,
        end_date: end,
    }
}

fn test_log_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("gearloan_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

// ── Conflicts ────────────────────────────────────────────

#[tokio::test]
async fn camera_example_end_to_end() {
    let (tracker, _, _) = camera_tracker().await;
    tracker.save_booking(input("cam-a", d(10), d(15))).await.unwrap();

    let err = tracker.save_booking(input("cam-a", d(12), d(13))).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.to_string(), CONFLICT_MESSAGE);

    tracker.save_booking(input("cam-a", d(16), d(20))).await.unwrap();
    assert_eq!(tracker.bookings().await.len(), 2);
}

#[tokio::test]
async fn identical_range_always_conflicts() {
    let (tracker, _, _) = camera_tracker().await;
    let first = tracker.save_booking(input("cam-a", d(3), d(4))).await.unwrap();
    let err = tracker.save_booking(input("cam-a", d(3), d(4))).await.unwrap_err();
    assert_eq!(err, TrackerError::Conflict { booking_id: first.id });
}

#[tokio::test]
async fn other_equipment_same_range_is_fine() {
    let (tracker, _, _) = camera_tracker().await;
    tracker.save_booking(input("cam-a", d(3), d(4))).await.unwrap();
    tracker.save_booking(input("mic-1", d(3), d(4))).await.unwrap();
}

#[tokio::test]
async fn checked_booking_still_blocks_its_range() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(1), d(5))).await.unwrap();
    assert!(tracker.approve_return(&b.id).await.unwrap());
    assert!(tracker.save_booking(input("cam-a", d(5), d(6))).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn no_overlapping_pair_after_many_attempts() {
    let (tracker, _, _) = camera_tracker().await;
    for start in 1..=28u32 {
        for len in 0..3u32 {
            let end = (start + len).min(31);
            let _ = tracker.save_booking(input("cam-a", d(start), d(end))).await;
        }
    }
    let bookings = tracker.bookings().await;
    assert!(!bookings.is_empty());
    for (i, a) in bookings.iter().enumerate() {
        for b in &bookings[i + 1..] {
            if a.equipment_id == b.equipment_id {
                assert!(a.end_date < b.start_date || a.start_date > b.end_date, "{a:?} overlaps {b:?}");
            }
        }
    }
}

#[tokio::test]
async fn concurrent_saves_admit_exactly_one() {
    let (tracker, _, _) = camera_tracker().await;
    let tracker = Arc::new(tracker);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let t = tracker.clone();
        handles.push(tokio::spawn(async move {
            t.save_booking(input("cam-a", d(10), d(12))).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(e.is_conflict()),
        }
    }
    assert_eq!(ok, 1);
}

// ── Validation ───────────────────────────────────────────

#[tokio::test]
async fn end_before_start_is_validation_not_conflict() {
    let (tracker, _, _) = camera_tracker().await;
    let err = tracker.save_booking(input("cam-a", d(10), d(9))).await.unwrap_err();
    assert_eq!(err, TrackerError::Validation("End date cannot be before start date.".into()));
    assert!(!err.is_conflict());
    assert!(tracker.bookings().await.is_empty());
}

#[tokio::test]
async fn blank_fields_rejected() {
    let (tracker, _, _) = camera_tracker().await;
    let mut bad = input("cam-a", d(1), d(2));
    bad.user_email = "   ".into();
    let err = tracker.save_booking(bad).await.unwrap_err();
    assert_eq!(err, TrackerError::Validation("All fields are required.".into()));

    let mut bad = input("", d(1), d(2));
    bad.user_name = "Alex".into();
    assert!(matches!(tracker.save_booking(bad).await, Err(TrackerError::Validation(_))));
}

#[tokio::test]
async fn create_assigns_fresh_id_and_unchecked() {
    let (tracker, _, _) = camera_tracker().await;
    let a = tracker.save_booking(input("cam-a", d(1), d(1))).await.unwrap();
    let b = tracker.save_booking(input("cam-a", d(2), d(2))).await.unwrap();
    assert_ne!(a.id, b.id);
    assert!(a.id.parse::<ulid::Ulid>().is_ok());
    assert!(!a.is_checked);
}

// ── Edits ────────────────────────────────────────────────

#[tokio::test]
async fn edit_to_own_range_never_conflicts() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(10), d(15))).await.unwrap();
    let mut edit = input("cam-a", d(10), d(15));
    edit.id = Some(b.id.clone());
    edit.user_name = "Alex Renamed".into();
    let saved = tracker.save_booking(edit).await.unwrap();
    assert_eq!(saved.id, b.id);
    assert_eq!(saved.user_name, "Alex Renamed");
    assert_eq!(tracker.bookings().await.len(), 1);
}

#[tokio::test]
async fn edit_into_other_booking_conflicts() {
    let (tracker, _, _) = camera_tracker().await;
    let a = tracker.save_booking(input("cam-a", d(1), d(3))).await.unwrap();
    let b = tracker.save_booking(input("cam-a", d(5), d(7))).await.unwrap();
    let mut edit = input("cam-a", d(2), d(6));
    edit.id = Some(b.id.clone());
    let err = tracker.save_booking(edit).await.unwrap_err();
    assert_eq!(err, TrackerError::Conflict { booking_id: a.id });
    assert_eq!(tracker.booking(&b.id).await.unwrap().start_date, d(5));
}

#[tokio::test]
async fn edit_unknown_id_is_not_found() {
    let (tracker, _, _) = camera_tracker().await;
    let mut edit = input("cam-a", d(1), d(2));
    edit.id = Some("ghost".into());
    assert_eq!(
        tracker.save_booking(edit).await.unwrap_err(),
        TrackerError::NotFound("ghost".into())
    );
}

#[tokio::test]
async fn edit_preserves_checked_flag() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(1), d(5))).await.unwrap();
    tracker.approve_return(&b.id).await.unwrap();
    let mut edit = input("mic-1", d(1), d(5));
    edit.id = Some(b.id.clone());
    let saved = tracker.save_booking(edit).await.unwrap();
    assert!(saved.is_checked);
    assert_eq!(saved.equipment_id, "mic-1");
}

#[tokio::test]
async fn amend_applies_partial_patch() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(10), d(12))).await.unwrap();
    let patch = BookingPatch {
        end_date: Some(d(14)),
        ..Default::default()
    };
    let saved = tracker.amend_booking(&b.id, patch).await.unwrap();
    assert_eq!(saved.start_date, d(10));
    assert_eq!(saved.end_date, d(14));
    assert_eq!(saved.user_email, "alex@trim.media");

    let bad = BookingPatch {
        start_date: Some(d(20)),
        ..Default::default()
    };
    assert!(matches!(tracker.amend_booking(&b.id, bad).await, Err(TrackerError::Validation(_))));
    assert!(matches!(
        tracker.amend_booking("ghost", BookingPatch::default()).await,
        Err(TrackerError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_removes_and_frees_range() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(1), d(5))).await.unwrap();
    assert!(tracker.delete_booking(&b.id).await.unwrap());
    assert!(!tracker.delete_booking(&b.id).await.unwrap());
    tracker.save_booking(input("cam-a", d(1), d(5))).await.unwrap();
}

// ── Returns and damage ───────────────────────────────────

#[tokio::test]
async fn early_return_clamps_end_to_today() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(18), d(25))).await.unwrap();
    assert!(tracker.approve_return(&b.id).await.unwrap());
    let after = tracker.booking(&b.id).await.unwrap();
    assert!(after.is_checked);
    assert_eq!(after.end_date, d(20));
    assert_eq!(after.start_date, d(18));
}

#[tokio::test]
async fn return_before_start_keeps_a_valid_range() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(22), d(26))).await.unwrap();
    assert!(tracker.approve_return(&b.id).await.unwrap());

    let after = tracker.booking(&b.id).await.unwrap();
    assert_eq!((after.start_date, after.end_date), (d(22), d(22)));

    // Still editable afterwards
    let patch = BookingPatch {
        user_name: Some("Brian".into()),
        ..BookingPatch::default()
    };
    let amended = tracker.amend_booking(&b.id, patch).await.unwrap();
    assert_eq!(amended.user_name, "Brian");
    assert_eq!(amended.end_date, d(22));
    // The freed days can be booked again
    tracker.save_booking(input("cam-a", d(23), d(26))).await.unwrap();
}

#[tokio::test]
async fn late_or_on_time_return_keeps_end() {
    let (tracker, _, _) = camera_tracker().await;
    let late = tracker.save_booking(input("cam-a", d(5), d(10))).await.unwrap();
    let on_time = tracker.save_booking(input("cam-a", d(15), d(20))).await.unwrap();
    tracker.approve_return(&late.id).await.unwrap();
    tracker.approve_return(&on_time.id).await.unwrap();
    assert_eq!(tracker.booking(&late.id).await.unwrap().end_date, d(10));
    let on_time = tracker.booking(&on_time.id).await.unwrap();
    assert_eq!(on_time.end_date, d(20));
    assert!(on_time.is_checked);
}

#[tokio::test]
async fn approve_unknown_is_noop() {
    let (tracker, _, _) = camera_tracker().await;
    assert!(!tracker.approve_return("ghost").await.unwrap());
}

#[tokio::test]
async fn blank_damage_report_is_noop() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(5), d(10))).await.unwrap();
    assert!(!tracker.report_damage(&b.id, "  \n\t ").await.unwrap());
    assert!(!tracker.booking(&b.id).await.unwrap().is_checked);
    assert!(tracker.damage_history("cam-a").await.is_empty());
}

#[tokio::test]
async fn damage_report_records_and_approves() {
    let (tracker, _, clock) = camera_tracker().await;
    let stamp = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 1, 20, 14, 5, 0).unwrap();
    clock.set(stamp);
    let b = tracker.save_booking(input("cam-a", d(18), d(25))).await.unwrap();

    assert!(tracker.report_damage(&b.id, "  scratched sensor ").await.unwrap());

    let history = tracker.damage_history("cam-a").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].description, "scratched sensor");
    assert_eq!(history[0].reported_by_email, "alex@trim.media");
    assert_eq!(history[0].booking_id, b.id);
    assert_eq!(history[0].date, stamp);
    assert!(tracker.damage_history("mic-1").await.is_empty());

    let after = tracker.booking(&b.id).await.unwrap();
    assert!(after.is_checked);
    assert_eq!(after.end_date, d(20));
}

#[tokio::test]
async fn damage_history_is_newest_first() {
    let (tracker, _, _) = camera_tracker().await;
    let a = tracker.save_booking(input("cam-a", d(1), d(2))).await.unwrap();
    let b = tracker.save_booking(input("cam-a", d(3), d(4))).await.unwrap();
    tracker.report_damage(&a.id, "first").await.unwrap();
    tracker.report_damage(&b.id, "second").await.unwrap();
    let history = tracker.damage_history("cam-a").await;
    let texts: Vec<_> = history.iter().map(|r| r.description.as_str()).collect();
    assert_eq!(texts, vec!["second", "first"]);
}

#[tokio::test]
async fn damage_on_orphaned_booking_still_approves() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("gone", d(1), d(2))).await.unwrap();
    assert!(tracker.report_damage(&b.id, "dented").await.unwrap());
    assert!(tracker.booking(&b.id).await.unwrap().is_checked);
    assert!(tracker.damage_history("gone").await.is_empty());
    assert_eq!(tracker.equipment_name("gone").await, UNKNOWN);
}

#[tokio::test]
async fn damage_for_unknown_booking_is_noop() {
    let (tracker, _, _) = camera_tracker().await;
    assert!(!tracker.report_damage("ghost", "broken").await.unwrap());
}

// ── Derived views ────────────────────────────────────────

#[tokio::test]
async fn queues_follow_the_clock() {
    let (tracker, _, clock) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(22), d(24))).await.unwrap();
    assert_eq!(tracker.queues().await, Queues::default());

    clock.set(FixedClock::at_day(d(23)).now());
    let q = tracker.queues().await;
    assert!(q.overdue.is_empty());
    assert_eq!(q.pending_inspection.len(), 1);

    clock.set(FixedClock::at_day(d(25)).now());
    let q = tracker.queues().await;
    assert_eq!(q.overdue[0].id, b.id);
    assert_eq!(q.pending_inspection[0].id, b.id);

    tracker.approve_return(&b.id).await.unwrap();
    assert_eq!(tracker.queues().await, Queues::default());
}

#[tokio::test]
async fn calendar_reflects_latest_mutation() {
    let (tracker, _, _) = camera_tracker().await;
    let january = YearMonth::new(2026, 1).unwrap();
    let b = tracker
        .save_booking(input("cam-a", d(30), NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()))
        .await
        .unwrap();

    let rows = tracker.calendar(january).await;
    assert_eq!(rows.len(), 2);
    let seg = &rows[0].segments[0];
    assert_eq!(seg.booking_id, b.id);
    assert_eq!((seg.start_column, seg.span_days), (29, 2));
    assert!(rows[1].segments.is_empty());

    tracker.delete_booking(&b.id).await.unwrap();
    assert!(tracker.calendar(january).await[0].segments.is_empty());
}

#[tokio::test]
async fn reminder_request_resolves_names() {
    let (tracker, _, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(5), d(8))).await.unwrap();
    let orphan = tracker.save_booking(input("gone", d(5), d(8))).await.unwrap();

    let req = tracker.reminder_request(&b.id).await.unwrap();
    assert_eq!(req.equipment_name, "Camera A");
    assert_eq!(req.user_email, "alex@trim.media");
    assert_eq!(req.due_date, d(8));

    let req = tracker.reminder_request(&orphan.id).await.unwrap();
    assert_eq!(req.equipment_name, "Unknown Equipment");
    assert!(tracker.reminder_request("ghost").await.is_none());
}

// ── Equipment ────────────────────────────────────────────

#[tokio::test]
async fn rename_and_add_equipment() {
    let (tracker, _, _) = camera_tracker().await;
    let renamed = tracker.rename_equipment("cam-a", "  Camera A (new body) ").await.unwrap();
    assert_eq!(renamed.name, "Camera A (new body)");
    assert_eq!(tracker.equipment_name("cam-a").await, "Camera A (new body)");

    assert!(matches!(
        tracker.rename_equipment("cam-a", "   ").await,
        Err(TrackerError::Validation(_))
    ));
    assert!(matches!(
        tracker.rename_equipment("ghost", "x").await,
        Err(TrackerError::NotFound(_))
    ));

    tracker.add_equipment("light-1", "Light Kit #1").await.unwrap();
    assert_eq!(tracker.equipment().await.len(), 3);
    assert!(matches!(
        tracker.add_equipment("light-1", "dup").await,
        Err(TrackerError::Validation(_))
    ));
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn failed_write_leaves_state_unchanged() {
    let (tracker, backend, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(18), d(25))).await.unwrap();
    backend.fail_writes(true);

    let err = tracker.save_booking(input("cam-a", d(1), d(2))).await.unwrap_err();
    assert!(matches!(err, TrackerError::Persistence(_)));
    assert!(matches!(tracker.approve_return(&b.id).await, Err(TrackerError::Persistence(_))));
    assert!(matches!(tracker.report_damage(&b.id, "bent").await, Err(TrackerError::Persistence(_))));
    assert!(matches!(tracker.delete_booking(&b.id).await, Err(TrackerError::Persistence(_))));

    let bookings = tracker.bookings().await;
    assert_eq!(bookings.len(), 1);
    assert!(!bookings[0].is_checked);
    assert_eq!(bookings[0].end_date, d(25));
    assert!(tracker.damage_history("cam-a").await.is_empty());

    backend.fail_writes(false);
    tracker.save_booking(input("cam-a", d(1), d(2))).await.unwrap();
}

#[tokio::test]
async fn mutations_write_through_to_backend() {
    let (tracker, backend, _) = camera_tracker().await;
    let b = tracker.save_booking(input("cam-a", d(18), d(25))).await.unwrap();
    tracker.report_damage(&b.id, "loose mount").await.unwrap();

    let bookings: Vec<Booking> = serde_json::from_str(&backend.raw(BOOKINGS_KEY).unwrap()).unwrap();
    assert_eq!(bookings.len(), 1);
    assert!(bookings[0].is_checked);
    let equipment: Vec<Equipment> = serde_json::from_str(&backend.raw(EQUIPMENT_KEY).unwrap()).unwrap();
    assert_eq!(equipment[0].damage_history[0].description, "loose mount");
}

#[tokio::test]
async fn empty_backend_opens_with_seed() {
    let clock = Arc::new(FixedClock::at_day(d(20)));
    let tracker = Tracker::open(Arc::new(MemoryBackend::new()), clock).await;
    assert_eq!(tracker.equipment().await.len(), 12);
    let q = tracker.queues().await;
    let overdue: Vec<_> = q.overdue.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(overdue, vec!["booking-1"]);
    let pending: Vec<_> = q.pending_inspection.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(pending, vec!["booking-1", "booking-2"]);
}

#[tokio::test]
async fn log_backed_tracker_survives_reopen() {
    let path = test_log_path("reopen.kv");
    let clock = Arc::new(FixedClock::at_day(d(20)));
    let id = {
        let backend = Arc::new(LogBackend::open(&path).unwrap());
        let tracker = Tracker::open(backend, clock.clone()).await;
        let b = tracker.save_booking(input("equip-4", d(1), d(3))).await.unwrap();
        tracker.report_damage(&b.id, "cracked screen").await.unwrap();
        b.id
    };

    let backend = Arc::new(LogBackend::open(&path).unwrap());
    let tracker = Tracker::open(backend, clock).await;
    let saved = tracker.booking(&id).await.unwrap();
    assert_eq!(tracker.bookings().await.len(), 6); // five seeded + ours
    assert!(saved.is_checked);
    assert_eq!(tracker.damage_history("equip-4").await[0].description, "cracked screen");
    assert_eq!(tracker.equipment().await.len(), 12);
}

#[tokio::test]
async fn compaction_keeps_latest_state() {
    let path = test_log_path("compact.kv");
    let clock = Arc::new(FixedClock::at_day(d(20)));
    let backend = Arc::new(LogBackend::open(&path).unwrap());
    let tracker = Tracker::open(backend.clone(), clock.clone()).await;
    for day in 1..=9 {
        tracker.save_booking(input("equip-12", d(day), d(day))).await.unwrap();
    }
    assert_eq!(tracker.log_appends_since_compact().await, 9);
    tracker.compact_log().await.unwrap();
    assert_eq!(tracker.log_appends_since_compact().await, 0);
    let expected = tracker.bookings().await;
    drop(tracker);
    drop(backend);

    let reopened = Tracker::open(Arc::new(LogBackend::open(&path).unwrap()), clock).await;
    assert_eq!(reopened.bookings().await, expected);
}
