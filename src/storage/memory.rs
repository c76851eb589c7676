//! In-memory storage engine.

use super::engine::{EngineCursor, EngineError, EngineResult, MapCursor, StorageEngine};
use std::collections::BTreeMap;

/// Volatile engine backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    records: BTreeMap<Vec<u8>, Vec<u8>>,
    closed: bool,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::closed());
        }
        Ok(())
    }
}

impl StorageEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.check_open()?;
        self.records.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> EngineResult<()> {
        self.check_open()?;
        self.records.remove(key);
        Ok(())
    }

    fn record_count(&self) -> u64 {
        self.records.len() as u64
    }

    fn cursor(&self) -> EngineResult<Box<dyn EngineCursor + '_>> {
        self.check_open()?;
        Ok(Box::new(MapCursor::new(self.records.keys())))
    }

    fn close(&mut self) -> EngineResult<()> {
        self.closed = true;
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::codes;

    #[test]
    fn test_put_get_remove() {
        let mut engine = MemoryEngine::new();
        engine.put(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.record_count(), 1);

        engine.remove(b"k").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), None);

        // Missing keys are not an error.
        engine.remove(b"k").unwrap();
        assert_eq!(engine.record_count(), 0);
    }

    #[test]
    fn test_closed_engine_rejects_calls() {
        let mut engine = MemoryEngine::new();
        engine.put(b"k", b"v").unwrap();
        engine.close().unwrap();

        let err = engine.get(b"k").unwrap_err();
        assert_eq!(err.code, codes::CLOSED);
        assert!(engine.put(b"k", b"v").is_err());
    }
}
