//! File-backed storage engine.
//!
//! Records live in an append-only log of length-prefixed bincode entries,
//! replayed into an ordered in-memory index on open. A sidecar `.lock` file
//! holds an exclusive advisory lock for the lifetime of the engine, so a
//! second open of the same path fails immediately instead of waiting.
//!
//! # Log format
//!
//! ```text
//! [len: u32 LE][bincode LogRecord] [len: u32 LE][bincode LogRecord] ...
//! ```
//!
//! A partially written trailing record (crash mid-append) is discarded and
//! truncated away on open. A length header pointing past intact records, or
//! any other undecodable record, fails the open with `CORRUPT`.

use super::engine::{codes, EngineCursor, EngineError, EngineResult, MapCursor, StorageEngine};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl LogRecord {
    fn frame(&self) -> EngineResult<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| EngineError::new(codes::IO, format!("failed to encode log record: {}", e)))?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

struct Replay {
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    log_records: u64,
    valid_len: u64,
}

/// Persistent engine over a single append-only log file.
pub struct FileEngine {
    path: PathBuf,
    lock: Option<File>,
    log: Option<File>,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    log_records: u64,
}

impl FileEngine {
    /// Create or open the store at `path`, failing fast if it is locked.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| EngineError::io("failed to open lock file", &e))?;
        lock.try_lock_exclusive().map_err(|e| {
            EngineError::new(
                codes::LOCKED,
                format!("{} is locked by another handle: {}", path.display(), e),
            )
        })?;

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| EngineError::io("failed to open store log", &e))?;

        let replay = replay_log(&log)?;
        let file_len = log
            .metadata()
            .map_err(|e| EngineError::io("failed to stat store log", &e))?
            .len();
        if replay.valid_len < file_len {
            log.set_len(replay.valid_len)
                .map_err(|e| EngineError::io("failed to truncate torn record", &e))?;
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = file_len - replay.valid_len,
                "discarded torn record at end of store log"
            );
        }
        log.seek(SeekFrom::End(0))
            .map_err(|e| EngineError::io("failed to seek store log", &e))?;

        tracing::debug!(
            path = %path.display(),
            records = replay.index.len(),
            log_records = replay.log_records,
            "store log replayed"
        );

        Ok(Self {
            path,
            lock: Some(lock),
            log: Some(log),
            index: replay.index,
            log_records: replay.log_records,
        })
    }

    /// Path of the store log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log records that no longer contribute to the live state.
    pub fn dead_records(&self) -> u64 {
        self.log_records.saturating_sub(self.index.len() as u64)
    }

    /// Rewrite the log so it holds exactly one record per live key.
    pub fn compact(&mut self) -> EngineResult<()> {
        if self.log.is_none() {
            return Err(EngineError::closed());
        }

        let tmp_path = self.path.with_extension("compact");
        {
            let tmp = File::create(&tmp_path)
                .map_err(|e| EngineError::io("failed to create compaction file", &e))?;
            let mut writer = BufWriter::new(&tmp);
            for (key, value) in &self.index {
                let frame = LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                }
                .frame()?;
                writer
                    .write_all(&frame)
                    .map_err(|e| EngineError::io("failed to write compaction file", &e))?;
            }
            writer
                .flush()
                .map_err(|e| EngineError::io("failed to flush compaction file", &e))?;
            drop(writer);
            tmp.sync_all()
                .map_err(|e| EngineError::io("failed to sync compaction file", &e))?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| EngineError::io("failed to replace store log", &e))?;

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| EngineError::io("failed to reopen store log", &e))?;
        log.seek(SeekFrom::End(0))
            .map_err(|e| EngineError::io("failed to seek store log", &e))?;

        let before = self.log_records;
        self.log = Some(log);
        self.log_records = self.index.len() as u64;

        tracing::info!(
            path = %self.path.display(),
            before,
            after = self.log_records,
            "store log compacted"
        );
        Ok(())
    }

    fn append(&mut self, record: &LogRecord) -> EngineResult<()> {
        let frame = record.frame()?;
        let log = self.log.as_mut().ok_or_else(EngineError::closed)?;
        log.write_all(&frame)
            .map_err(|e| EngineError::io("failed to append to store log", &e))?;
        self.log_records += 1;
        Ok(())
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.log.is_none() {
            return Err(EngineError::closed());
        }
        Ok(())
    }
}

impl StorageEngine for FileEngine {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.index.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.append(&LogRecord::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.index.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> EngineResult<()> {
        self.check_open()?;
        if !self.index.contains_key(key) {
            return Ok(());
        }
        self.append(&LogRecord::Remove { key: key.to_vec() })?;
        self.index.remove(key);
        Ok(())
    }

    fn record_count(&self) -> u64 {
        self.index.len() as u64
    }

    fn cursor(&self) -> EngineResult<Box<dyn EngineCursor + '_>> {
        self.check_open()?;
        Ok(Box::new(MapCursor::new(self.index.keys())))
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.log.is_none() {
            return Ok(());
        }

        if self.dead_records() > self.index.len() as u64 {
            self.compact()?;
        }

        if let Some(log) = self.log.take() {
            log.sync_all()
                .map_err(|e| EngineError::io("failed to sync store log", &e))?;
        }
        if let Some(lock) = self.lock.take() {
            let _ = lock.unlock();
        }
        self.index.clear();

        tracing::debug!(path = %self.path.display(), "store log closed");
        Ok(())
    }
}

impl Drop for FileEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to close store log");
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn replay_log(log: &File) -> EngineResult<Replay> {
    let mut reader = BufReader::new(log);
    let mut index = BTreeMap::new();
    let mut log_records = 0u64;
    let mut valid_len = 0u64;
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(EngineError::io("failed to read record length", &e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        // Grows with what the file holds, not with what the header claims.
        let mut body = Vec::new();
        (&mut reader)
            .take(len as u64)
            .read_to_end(&mut body)
            .map_err(|e| EngineError::io("failed to read record body", &e))?;
        if body.len() < len {
            if is_torn_record(&body) {
                break;
            }
            return Err(EngineError::new(
                codes::CORRUPT,
                format!(
                    "record at offset {} declares {} bytes but only {} remain",
                    valid_len,
                    len,
                    body.len()
                ),
            ));
        }

        let record: LogRecord = bincode::deserialize(&body).map_err(|e| {
            EngineError::new(
                codes::CORRUPT,
                format!("undecodable record at offset {}: {}", valid_len, e),
            )
        })?;
        match record {
            LogRecord::Put { key, value } => {
                index.insert(key, value);
            }
            LogRecord::Remove { key } => {
                index.remove(&key);
            }
        }

        log_records += 1;
        valid_len += 4 + len as u64;
    }

    Ok(Replay {
        index,
        log_records,
        valid_len,
    })
}

/// A crash mid-append leaves a strict prefix of one encoded record, which
/// can only fail to decode by running out of input. Bytes that still hold a
/// whole record mean the length header itself is damaged.
fn is_torn_record(rest: &[u8]) -> bool {
    match bincode::deserialize::<LogRecord>(rest) {
        Ok(_) => false,
        Err(e) => matches!(
            *e,
            bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof
        ),
    }
}
