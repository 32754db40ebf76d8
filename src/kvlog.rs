use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One `set` against the key-value store. The latest record for a key wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRecord {
    pub key: String,
    pub value: String,
}

impl KvRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Encode one entry to [len][bincode][crc32] format. An entry carries every
/// record of a single `set_many`, so they replay together or not at all.
fn encode_entry(writer: &mut impl Write, records: &[KvRecord]) -> io::Result<()> {
    let payload =
        bincode::serialize(records).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "entry too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Result of scanning a log file.
#[derive(Debug, Default)]
pub struct Replay {
    /// Every record of every intact entry, in write order.
    pub records: Vec<KvRecord>,
    /// Byte offset just past the last intact entry.
    pub valid_len: u64,
    /// Byte length of the file as found.
    pub file_len: u64,
}

/// Append-only key-value log.
///
/// Format per entry: `[u32: len][bincode: Vec<KvRecord>][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) ends the replay and is
///   cut off when the log is reopened, so new entries never land behind it.
pub struct KvLog {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl KvLog {
    /// Open (or create) the log at `path`, returning it with the records it
    /// already holds. A torn tail is truncated before the first append.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<KvRecord>)> {
        let replay = Self::scan(path)?;
        if replay.valid_len < replay.file_len {
            tracing::warn!(
                "discarding {} torn bytes at the end of {}",
                replay.file_len - replay.valid_len,
                path.display()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let log = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((log, replay.records))
    }

    /// Append and fsync a single entry. Tests only; the writer task batches.
    #[cfg(test)]
    pub fn append(&mut self, records: &[KvRecord]) -> io::Result<()> {
        self.append_buffered(records)?;
        self.flush_sync()
    }

    /// Buffer one entry without flushing. Follow with `flush_sync()`.
    pub fn append_buffered(&mut self, records: &[KvRecord]) -> io::Result<()> {
        encode_entry(&mut self.writer, records)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Write the compacted records as one entry to a temp file next to the log and fsync.
    fn write_compact_file(path: &Path, records: &[KvRecord]) -> io::Result<()> {
        let tmp_path = path.with_extension("kv.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        encode_entry(&mut writer, records)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen for appends.
    fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("kv.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Rewrite the log keeping only the latest value per key.
    pub fn compact(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        let records = latest_records(Self::replay(&self.path)?);
        Self::write_compact_file(&self.path, &records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All records of the intact entries in write order. A missing file
    /// replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<KvRecord>> {
        Ok(Self::scan(path)?.records)
    }

    /// Walk the log entry by entry, stopping at the first torn or corrupt one.
    pub fn scan(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay {
            file_len,
            ..Replay::default()
        };

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u64::from(u32::from_le_bytes(len_buf));
            // Entry would run past the end of the file: torn length or payload
            if replay.valid_len + 8 + len > file_len {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Vec<KvRecord>>(&payload) {
                Ok(records) => replay.records.extend(records),
                Err(_) => break,
            }
            replay.valid_len += 8 + len;
        }

        Ok(replay)
    }
}

/// Collapse a replay into the current value per key.
pub fn fold_latest(records: Vec<KvRecord>) -> HashMap<String, String> {
    records.into_iter().map(|r| (r.key, r.value)).collect()
}

/// The current value per key as records, sorted by key for a stable file.
fn latest_records(records: Vec<KvRecord>) -> Vec<KvRecord> {
    let mut latest: Vec<KvRecord> = fold_latest(records)
        .into_iter()
        .map(|(key, value)| KvRecord { key, value })
        .collect();
    latest.sort_by(|a, b| a.key.cmp(&b.key));
    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gearloan_test_kvlog");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn garbage(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.kv");

        let records = vec![
            KvRecord::new("gearloan_equipment", "[]"),
            KvRecord::new("gearloan_bookings", r#"[{"id":"b1"}]"#),
        ];
        {
            let (mut log, existing) = KvLog::open(&path).unwrap();
            assert!(existing.is_empty());
            for r in &records {
                log.append(std::slice::from_ref(r)).unwrap();
            }
        }

        assert_eq!(KvLog::replay(&path).unwrap(), records);
        let (_, existing) = KvLog::open(&path).unwrap();
        assert_eq!(existing, records);
    }

    #[test]
    fn latest_value_wins() {
        let records = vec![
            KvRecord::new("a", "1"),
            KvRecord::new("b", "x"),
            KvRecord::new("a", "2"),
        ];
        let map = fold_latest(records);
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "2");
        assert_eq!(map["b"], "x");
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.kv");

        let record = KvRecord::new("k", "v");
        {
            let (mut log, _) = KvLog::open(&path).unwrap();
            log.append(std::slice::from_ref(&record)).unwrap();
        }
        garbage(&path, &[0u8; 6]); // partial length + some bytes

        let replay = KvLog::scan(&path).unwrap();
        assert_eq!(replay.records, vec![record]);
        assert_eq!(replay.file_len, replay.valid_len + 6);
    }

    #[test]
    fn appends_after_torn_tail_survive_reopen() {
        let path = tmp_path("torn_then_append.kv");
        {
            let (mut log, _) = KvLog::open(&path).unwrap();
            log.append(&[KvRecord::new("gearloan_bookings", r#"["old"]"#)]).unwrap();
        }
        garbage(&path, &[7, 0, 0, 0, 1, 2]);

        {
            let (mut log, existing) = KvLog::open(&path).unwrap();
            assert_eq!(existing.len(), 1);
            log.append(&[KvRecord::new("gearloan_bookings", r#"["new"]"#)]).unwrap();
        }

        let latest = fold_latest(KvLog::replay(&path).unwrap());
        assert_eq!(latest["gearloan_bookings"], r#"["new"]"#);
        let replay = KvLog::scan(&path).unwrap();
        assert_eq!(replay.valid_len, replay.file_len);
    }

    #[test]
    fn multi_key_entry_is_all_or_nothing() {
        let path = tmp_path("multi_key.kv");
        let pair = [
            KvRecord::new("gearloan_equipment", "[1]"),
            KvRecord::new("gearloan_bookings", "[2]"),
        ];
        {
            let (mut log, _) = KvLog::open(&path).unwrap();
            log.append(&pair).unwrap();
        }
        assert_eq!(KvLog::replay(&path).unwrap(), pair.to_vec());

        // Tear the entry by dropping its last byte
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 1).unwrap();
        assert!(KvLog::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.kv");
        assert!(KvLog::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.kv");

        {
            let payload = bincode::serialize(&vec![KvRecord::new("k", "v")]).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;
            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        assert!(KvLog::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn oversized_length_is_treated_as_torn() {
        let path = tmp_path("oversized.kv");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        let replay = KvLog::scan(&path).unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn compact_keeps_latest_per_key() {
        let path = tmp_path("compact.kv");

        {
            let (mut log, _) = KvLog::open(&path).unwrap();
            for i in 0..20 {
                log.append(&[KvRecord::new("gearloan_bookings", format!("[{i}]"))]).unwrap();
            }
            log.append(&[KvRecord::new("gearloan_equipment", "[]")]).unwrap();
            assert_eq!(log.appends_since_compact(), 21);

            let before = fs::metadata(&path).unwrap().len();
            log.compact().unwrap();
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted log should be smaller: {after} < {before}");
            assert_eq!(log.appends_since_compact(), 0);

            // appends after compaction land in the new file
            log.append(&[KvRecord::new("gearloan_equipment", "[1]")]).unwrap();
        }

        let replayed = KvLog::replay(&path).unwrap();
        assert_eq!(
            replayed,
            vec![
                KvRecord::new("gearloan_bookings", "[19]"),
                KvRecord::new("gearloan_equipment", "[]"),
                KvRecord::new("gearloan_equipment", "[1]"),
            ]
        );
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.kv");

        let records: Vec<KvRecord> = (0..5).map(|i| KvRecord::new(format!("k{i}"), "v")).collect();
        {
            let (mut log, _) = KvLog::open(&path).unwrap();
            for r in &records {
                log.append_buffered(std::slice::from_ref(r)).unwrap();
            }
            assert_eq!(log.appends_since_compact(), 5);
            log.flush_sync().unwrap();
        }

        assert_eq!(KvLog::replay(&path).unwrap(), records);
    }
}
