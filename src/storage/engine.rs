//! Storage engine interface.
//!
//! A storage engine is a byte-keyed persistent map with a restart-per-call
//! key cursor. Engines are not thread-safe on their own; `ConcurrentStore`
//! is the only component that touches one, always under its lock.

use crate::core::error::CabinetError;
use std::collections::btree_map;
use thiserror::Error;

/// Engine diagnostic codes.
pub mod codes {
    /// Generic IO failure without an OS error number.
    pub const IO: i32 = -1;
    /// Another handle holds the exclusive lock on the path.
    pub const LOCKED: i32 = -2;
    /// The on-disk log could not be decoded.
    pub const CORRUPT: i32 = -3;
    /// The engine was already closed.
    pub const CLOSED: i32 = -4;
}

/// Native engine failure: a code plus the engine's own message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn closed() -> Self {
        Self::new(codes::CLOSED, "engine is closed")
    }

    /// Map an IO error, keeping the OS error number when there is one.
    pub fn io(context: &str, error: &std::io::Error) -> Self {
        Self::new(
            error.raw_os_error().unwrap_or(codes::IO),
            format!("{}: {}", context, error),
        )
    }
}

impl From<EngineError> for CabinetError {
    fn from(error: EngineError) -> Self {
        CabinetError::StorageFatal {
            code: error.code,
            message: error.message,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Forward-only key cursor. A new cursor always starts at the first key.
pub trait EngineCursor {
    fn next_key(&mut self) -> EngineResult<Option<Vec<u8>>>;
}

/// Persistent byte-keyed store.
pub trait StorageEngine: Send + Sync {
    /// Look up a key. A missing record is `Ok(None)`.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Insert or overwrite a record.
    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Delete a record. Deleting a missing key succeeds.
    fn remove(&mut self, key: &[u8]) -> EngineResult<()>;

    /// Number of records.
    fn record_count(&self) -> u64;

    /// Start a key cursor at the first record.
    fn cursor(&self) -> EngineResult<Box<dyn EngineCursor + '_>>;

    /// Flush and release the engine. Later calls fail with `codes::CLOSED`.
    fn close(&mut self) -> EngineResult<()>;
}

/// Cursor over the keys of an in-memory ordered index.
pub struct MapCursor<'a> {
    keys: btree_map::Keys<'a, Vec<u8>, Vec<u8>>,
}

impl<'a> MapCursor<'a> {
    pub fn new(keys: btree_map::Keys<'a, Vec<u8>, Vec<u8>>) -> Self {
        Self { keys }
    }
}

impl EngineCursor for MapCursor<'_> {
    fn next_key(&mut self) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.keys.next().cloned())
    }
}

/// Direct engine access for the exclusive phases of an iteration.
///
/// Handed to `Worker::initialize` and `Worker::shutdown` while the store's
/// write lock is already held, so these calls never touch the lock.
pub struct EngineView<'a> {
    engine: &'a mut dyn StorageEngine,
}

impl<'a> EngineView<'a> {
    pub fn new(engine: &'a mut dyn StorageEngine) -> Self {
        Self { engine }
    }

    pub fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.engine.get(key)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.engine.put(key, value)
    }

    pub fn remove(&mut self, key: &[u8]) -> EngineResult<()> {
        self.engine.remove(key)
    }

    pub fn size(&self) -> u64 {
        self.engine.record_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_engine_error_maps_to_storage_fatal() {
        let err: CabinetError = EngineError::new(codes::LOCKED, "path is locked").into();
        match err {
            CabinetError::StorageFatal { code, message } => {
                assert_eq!(code, codes::LOCKED);
                assert_eq!(message, "path is locked");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_io_error_keeps_os_code() {
        let io = std::io::Error::from_raw_os_error(13);
        let err = EngineError::io("open", &io);
        assert_eq!(err.code, 13);
        assert!(err.message.starts_with("open: "));
    }

    #[test]
    fn test_map_cursor_restarts_from_first_key() {
        let mut map = BTreeMap::new();
        map.insert(b"b".to_vec(), b"2".to_vec());
        map.insert(b"a".to_vec(), b"1".to_vec());

        let mut cursor = MapCursor::new(map.keys());
        assert_eq!(cursor.next_key().unwrap(), Some(b"a".to_vec()));
        assert_eq!(cursor.next_key().unwrap(), Some(b"b".to_vec()));
        assert_eq!(cursor.next_key().unwrap(), None);

        let mut again = MapCursor::new(map.keys());
        assert_eq!(again.next_key().unwrap(), Some(b"a".to_vec()));
    }
}
