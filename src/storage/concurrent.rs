//! Thread-safe store over a single storage engine.
//!
//! `ConcurrentStore` is the only component that touches a `StorageEngine`.
//! Reads share the lock, writes take it exclusively, and iteration walks
//! through an exclusive, shared, exclusive sequence so workers can prepare
//! and finish with full access while the scan itself runs concurrently with
//! readers.
//!
//! # Reentrancy
//!
//! The lock is not reentrant. A worker that calls `put` or `remove` on the
//! same store from inside `Worker::iterate` deadlocks. Mutations belong in
//! `initialize` or `shutdown`, through the `EngineView` they receive.

use super::engine::{EngineView, StorageEngine};
use super::file::FileEngine;
use super::memory::MemoryEngine;
use crate::core::error::{CabinetError, CabinetResult};
use crate::worker::library::RemoveAll;
use crate::worker::Worker;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::path::Path;
use tracing::Span;

/// Readers-writer guarded storage engine.
pub struct ConcurrentStore {
    engine: RwLock<Option<Box<dyn StorageEngine>>>,
    span: Span,
}

impl ConcurrentStore {
    /// Open a file-backed store, failing immediately if the path is locked.
    pub fn open(path: impl AsRef<Path>) -> CabinetResult<Self> {
        let path = path.as_ref();
        let engine = FileEngine::open(path)?;
        let store = Self::with_engine(engine);
        tracing::info!(parent: &store.span, path = %path.display(), "store opened");
        Ok(store)
    }

    /// Create a volatile store.
    pub fn in_memory() -> Self {
        Self::with_engine(MemoryEngine::new())
    }

    /// Wrap an arbitrary engine.
    pub fn with_engine<E: StorageEngine + 'static>(engine: E) -> Self {
        Self {
            engine: RwLock::new(Some(Box::new(engine))),
            span: Span::none(),
        }
    }

    /// Emit this store's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Look up a key under the shared lock.
    pub fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        let guard = self.engine.read();
        let engine = guard.as_ref().ok_or(CabinetError::Closed)?;
        Ok(engine.get(key)?)
    }

    /// Insert or overwrite, returning the previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        let mut guard = self.engine.write();
        let engine = guard.as_mut().ok_or(CabinetError::Closed)?;
        let previous = engine.get(key)?;
        engine.put(key, value)?;
        Ok(previous)
    }

    /// Delete a key, returning the removed value. Absent keys are a no-op.
    pub fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        let mut guard = self.engine.write();
        let engine = guard.as_mut().ok_or(CabinetError::Closed)?;
        let previous = engine.get(key)?;
        if previous.is_some() {
            engine.remove(key)?;
        }
        Ok(previous)
    }

    /// Record count at call time.
    pub fn size(&self) -> CabinetResult<u64> {
        let guard = self.engine.read();
        let engine = guard.as_ref().ok_or(CabinetError::Closed)?;
        Ok(engine.record_count())
    }

    /// Record count as an `i32`, failing when the true count does not fit.
    pub fn size_i32(&self) -> CabinetResult<i32> {
        let count = self.size()?;
        i32::try_from(count).map_err(|_| CabinetError::SizeOverflow {
            count,
            target: "i32",
        })
    }

    /// Run a worker over every entry.
    ///
    /// 1. Exclusive lock: construct the worker and call `initialize`.
    /// 2. Atomic downgrade to the shared lock: feed entries to `iterate`
    ///    until the cursor is exhausted or the worker asks to stop.
    /// 3. Release, then reacquire exclusively: call `shutdown`.
    ///
    /// No writer can slip in between initialize and the scan. Writers may
    /// run between the scan and shutdown.
    pub fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        let mut worker = W::default();

        let mut guard = self.engine.write();
        {
            let engine = guard.as_mut().ok_or(CabinetError::Closed)?;
            worker.initialize(&mut EngineView::new(engine.as_mut()), config)?;
        }

        let guard = RwLockWriteGuard::downgrade(guard);
        let mut scanned = 0u64;
        let mut stopped_early = false;
        {
            let engine = guard.as_ref().ok_or(CabinetError::Closed)?;
            let mut cursor = engine.cursor()?;
            while let Some(key) = cursor.next_key()? {
                let Some(value) = engine.get(&key)? else {
                    continue;
                };
                scanned += 1;
                if worker.iterate(&key, &value) {
                    stopped_early = true;
                    break;
                }
            }
        }
        drop(guard);

        let mut guard = self.engine.write();
        let engine = guard.as_mut().ok_or(CabinetError::Closed)?;
        worker.shutdown(&mut EngineView::new(engine.as_mut()))?;

        tracing::debug!(
            parent: &self.span,
            worker = W::TAG,
            scanned,
            stopped_early,
            "iteration finished"
        );
        Ok(worker)
    }

    /// Remove every entry.
    pub fn clear(&self) -> CabinetResult<()> {
        let worker = self.iterate::<RemoveAll>(&())?;
        tracing::debug!(parent: &self.span, removed = worker.removed, "store cleared");
        Ok(())
    }

    /// Close the engine. Later calls return `Closed`; closing twice is a no-op.
    pub fn close(&self) -> CabinetResult<()> {
        let mut guard = self.engine.write();
        if let Some(mut engine) = guard.take() {
            engine.close()?;
            tracing::info!(parent: &self.span, "store closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.engine.read().is_none()
    }
}

impl std::fmt::Debug for ConcurrentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentStore")
            .field("closed", &self.is_closed())
            .finish()
    }
}
