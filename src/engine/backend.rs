use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::kvlog::{self, KvLog, KvRecord};

use super::TrackerError;

pub const EQUIPMENT_KEY: &str = "gearloan_equipment";
pub const BOOKINGS_KEY: &str = "gearloan_bookings";

/// Key-value persistence boundary. Values are opaque JSON blobs.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TrackerError>;

    /// Write several keys as one durable unit.
    async fn set_many(&self, entries: Vec<KvRecord>) -> Result<(), TrackerError>;

    async fn set(&self, key: &str, value: String) -> Result<(), TrackerError> {
        self.set_many(vec![KvRecord::new(key, value)]).await
    }

    /// Drop superseded values. No-op for backends without history.
    async fn compact(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        0
    }
}

// ── In-memory ────────────────────────────────────────────

/// Ephemeral backend for tests and throwaway pools.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K: Into<String>, V: Into<String>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let backend = Self::new();
        for (k, v) in entries {
            backend.entries.insert(k.into(), v.into());
        }
        backend
    }

    /// Make every subsequent `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `get` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.value().clone())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, TrackerError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TrackerError::Persistence("read refused".into()));
        }
        Ok(self.raw(key))
    }

    async fn set_many(&self, entries: Vec<KvRecord>) -> Result<(), TrackerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Persistence("write refused".into()));
        }
        for record in entries {
            self.entries.insert(record.key, record.value);
        }
        Ok(())
    }
}

// ── Log-backed, group commit ─────────────────────────────

pub(super) enum LogCommand {
    Append {
        records: Vec<KvRecord>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<KvRecord>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the log and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
async fn log_writer_loop(mut log: KvLog, mut rx: mpsc::Receiver<LogCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LogCommand::Append { records, response } => {
                let mut batch = vec![(records, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(LogCommand::Append { records, response }) => {
                            batch.push((records, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut log, &mut batch);
                if let Some(other) = deferred {
                    handle_maintenance(&mut log, other);
                }
            }
            other => handle_maintenance(&mut log, other),
        }
    }
}

fn commit_batch(log: &mut KvLog, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::KVLOG_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(log, batch);
    metrics::histogram!(crate::observability::KVLOG_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("kv log flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(log: &mut KvLog, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (records, _) in batch {
        if let Err(e) = log.append_buffered(records) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = log.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_maintenance(log: &mut KvLog, cmd: LogCommand) {
    match cmd {
        LogCommand::Compact { response } => {
            let _ = response.send(log.compact());
        }
        LogCommand::AppendsSinceCompact { response } => {
            let _ = response.send(log.appends_since_compact());
        }
        LogCommand::Append { records, response } => {
            let mut batch = vec![(records, response)];
            commit_batch(log, &mut batch);
        }
    }
}

/// Backend persisted to an append-only [`KvLog`]. Reads are served from the
/// replayed cache; writes go through the group-commit writer task.
pub struct LogBackend {
    cache: DashMap<String, String>,
    tx: mpsc::Sender<LogCommand>,
}

impl LogBackend {
    /// Replay `path`, cut any torn tail, and start the writer task. Must run
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (log, records) = KvLog::open(path)?;
        let latest = kvlog::fold_latest(records);
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(log_writer_loop(log, rx));

        let cache = DashMap::new();
        for (k, v) in latest {
            cache.insert(k, v);
        }
        Ok(Self { cache, tx })
    }

    async fn request<T>(
        &self,
        cmd: LogCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, TrackerError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| TrackerError::Persistence("log writer shut down".into()))?;
        rx.await
            .map_err(|_| TrackerError::Persistence("log writer dropped response".into()))
    }
}

#[async_trait]
impl KvBackend for LogBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, TrackerError> {
        Ok(self.cache.get(key).map(|e| e.value().clone()))
    }

    async fn set_many(&self, entries: Vec<KvRecord>) -> Result<(), TrackerError> {
        let (tx, rx) = oneshot::channel();
        let cmd = LogCommand::Append {
            records: entries.clone(),
            response: tx,
        };
        self.request(cmd, rx).await??;
        for record in entries {
            self.cache.insert(record.key, record.value);
        }
        Ok(())
    }

    async fn compact(&self) -> Result<(), TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.request(LogCommand::Compact { response: tx }, rx).await??;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.request(LogCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}
