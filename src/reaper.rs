use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Tracker;
use crate::model::Booking;

/// Background task that watches for loans going overdue.
///
/// Each tick recomputes the overdue queue, publishes its size and logs every
/// booking that became overdue since the previous tick.
pub async fn run_overdue_sweeper(pool: String, tracker: Arc<Tracker>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut seen = HashSet::new();
    loop {
        interval.tick().await;
        let (count, newly) = sweep(&tracker, &mut seen).await;
        metrics::gauge!(crate::observability::OVERDUE_LOANS, "pool" => pool.clone()).set(count as f64);
        for b in newly {
            warn!(
                "booking {} overdue in {pool}: {} has {} since {}",
                b.id, b.user_email, b.equipment_id, b.end_date
            );
        }
    }
}

/// Overdue count plus the bookings not in `seen` yet. `seen` is replaced by
/// the current overdue ids so a returned-then-reopened id would log again.
async fn sweep(tracker: &Tracker, seen: &mut HashSet<String>) -> (usize, Vec<Booking>) {
    let overdue = tracker.queues().await.overdue;
    let current: HashSet<String> = overdue.iter().map(|b| b.id.clone()).collect();
    let newly = overdue.into_iter().filter(|b| !seen.contains(&b.id)).collect();
    let count = current.len();
    *seen = current;
    (count, newly)
}

/// Background task that compacts the key-value log once enough appends pile up.
pub async fn run_compactor(tracker: Arc<Tracker>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = tracker.log_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match tracker.compact_log().await {
            Ok(()) => info!("compacted kv log after {appends} appends"),
            Err(e) => tracing::error!("kv log compaction failed: {e}"),
        }
    }
}
