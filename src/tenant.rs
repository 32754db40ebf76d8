use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::engine::{Clock, LogBackend, SystemClock, Tracker};
use crate::limits::*;
use crate::reaper;
use crate::reminder::{ReminderDesk, ReminderGenerator};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// File stem for a pool's log. Strips everything but alphanumerics, `_` and
/// `-` so a database name can never escape the data directory.
pub fn pool_file_stem(name: &str) -> Result<String, &'static str> {
    if name.len() > MAX_POOL_NAME_LEN {
        return Err("pool name too long");
    }
    let safe_name: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err("empty pool name");
    }
    Ok(safe_name)
}

/// One equipment pool: its tracker and the reminder requests in flight for it.
pub struct Pool {
    pub name: String,
    pub tracker: Arc<Tracker>,
    pub reminders: ReminderDesk,
}

/// Manages per-pool trackers. Each pool gets its own Tracker + log + sweeper.
/// Pool = database name from the pgwire connection.
pub struct PoolManager {
    pools: DashMap<String, Arc<Pool>>,
    creating: Mutex<()>,
    data_dir: PathBuf,
    compact_threshold: u64,
    generator: Arc<dyn ReminderGenerator>,
    clock: Arc<dyn Clock>,
}

impl PoolManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, generator: Arc<dyn ReminderGenerator>) -> Self {
        Self::with_clock(data_dir, compact_threshold, generator, Arc::new(SystemClock))
    }

    pub fn with_clock(
        data_dir: PathBuf,
        compact_threshold: u64,
        generator: Arc<dyn ReminderGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pools: DashMap::new(),
            creating: Mutex::new(()),
            data_dir,
            compact_threshold,
            generator,
            clock,
        }
    }

    /// Get or lazily open the pool for the given database name. Names that
    /// sanitise to the same file stem share one pool.
    pub async fn get_or_create(&self, name: &str) -> std::io::Result<Arc<Pool>> {
        let safe_name = pool_file_stem(name)
            .map_err(|reason| std::io::Error::new(std::io::ErrorKind::InvalidInput, reason))?;
        if let Some(pool) = self.pools.get(&safe_name) {
            return Ok(pool.value().clone());
        }

        let _guard = self.creating.lock().await;
        if let Some(pool) = self.pools.get(&safe_name) {
            return Ok(pool.value().clone());
        }
        if self.pools.len() >= MAX_POOLS {
            return Err(std::io::Error::other("too many pools"));
        }

        let log_path = self.data_dir.join(format!("{safe_name}.kv"));
        let backend = Arc::new(LogBackend::open(&log_path)?);
        let tracker = Arc::new(Tracker::open(backend, self.clock.clone()).await);

        tokio::spawn(reaper::run_overdue_sweeper(
            safe_name.clone(),
            tracker.clone(),
            SWEEP_INTERVAL,
        ));
        tokio::spawn(reaper::run_compactor(tracker.clone(), self.compact_threshold));

        let pool = Arc::new(Pool {
            name: safe_name.clone(),
            tracker,
            reminders: ReminderDesk::new(self.generator.clone()),
        });
        self.pools.insert(safe_name, pool.clone());
        metrics::gauge!(crate::observability::POOLS_ACTIVE).set(self.pools.len() as f64);
        tracing::info!("opened pool {name} at {}", log_path.display());
        Ok(pool)
    }
}
