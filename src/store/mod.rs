//! The store contract shared by local, remote and sharded stores.
//!
//! `Store` carries the primitive operations. The map helpers (`keys`,
//! `contains_value`, `hash_code`, ...) are provided methods built on
//! `iterate`, so every implementation gets them for free, and a shard router
//! evaluates them with one fan-out.

pub mod typed;

pub use typed::TypedMap;

use crate::core::error::{CabinetError, CabinetResult};
use crate::rpc::client::RemoteStore;
use crate::storage::ConcurrentStore;
use crate::worker::library::{
    FindValue, FindValueConfig, HashCode, MakeKeySet, MakeValueCollection,
};
use crate::worker::Worker;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Byte-keyed map operations.
pub trait Store: Send + Sync {
    /// Look up a key. A missing record is `None`.
    fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>>;

    /// Insert or overwrite. Returns the previous value when the
    /// implementation reports one.
    fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>>;

    /// Delete a key. Absent keys are a no-op.
    fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>>;

    /// Run a worker over every entry and return it finished.
    fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W>;

    /// Record count.
    fn size(&self) -> CabinetResult<u64>;

    /// Remove every entry.
    fn clear(&self) -> CabinetResult<()>;

    /// Release the store. Later calls fail with `Closed`.
    fn close(&self) -> CabinetResult<()>;

    fn contains_key(&self, key: &[u8]) -> CabinetResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn contains_value(&self, value: &[u8]) -> CabinetResult<bool> {
        let config = FindValueConfig {
            target: value.to_vec(),
        };
        Ok(self.iterate::<FindValue>(&config)?.found)
    }

    fn keys(&self) -> CabinetResult<BTreeSet<Vec<u8>>> {
        Ok(self.iterate::<MakeKeySet>(&())?.keys)
    }

    fn values(&self) -> CabinetResult<Vec<Vec<u8>>> {
        Ok(self.iterate::<MakeValueCollection>(&())?.values)
    }

    /// Order-independent hash of all entries. Equal maps hash equally.
    fn hash_code(&self) -> CabinetResult<u64> {
        Ok(self.iterate::<HashCode>(&())?.hash)
    }

    fn is_empty(&self) -> CabinetResult<bool> {
        Ok(self.size()? == 0)
    }

    fn put_all<I, K, V>(&self, entries: I) -> CabinetResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        for (key, value) in entries {
            self.put(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Record count as an `i32`, failing when the true count does not fit.
    fn size_i32(&self) -> CabinetResult<i32> {
        let count = self.size()?;
        i32::try_from(count).map_err(|_| CabinetError::SizeOverflow {
            count,
            target: "i32",
        })
    }
}

impl Store for ConcurrentStore {
    fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        ConcurrentStore::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        ConcurrentStore::put(self, key, value)
    }

    fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        ConcurrentStore::remove(self, key)
    }

    fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        ConcurrentStore::iterate(self, config)
    }

    fn size(&self) -> CabinetResult<u64> {
        ConcurrentStore::size(self)
    }

    fn clear(&self) -> CabinetResult<()> {
        ConcurrentStore::clear(self)
    }

    fn close(&self) -> CabinetResult<()> {
        ConcurrentStore::close(self)
    }
}

impl Store for RemoteStore {
    fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        RemoteStore::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        RemoteStore::put(self, key, value)
    }

    fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        RemoteStore::remove(self, key)
    }

    fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        RemoteStore::iterate(self, config)
    }

    fn size(&self) -> CabinetResult<u64> {
        RemoteStore::size(self)
    }

    fn clear(&self) -> CabinetResult<()> {
        RemoteStore::clear(self)
    }

    fn close(&self) -> CabinetResult<()> {
        RemoteStore::close(self)
    }
}

impl<T: Store> Store for Arc<T> {
    fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        (**self).remove(key)
    }

    fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        (**self).iterate(config)
    }

    fn size(&self) -> CabinetResult<u64> {
        (**self).size()
    }

    fn clear(&self) -> CabinetResult<()> {
        (**self).clear()
    }

    fn close(&self) -> CabinetResult<()> {
        (**self).close()
    }
}

/// A local or remote store, so one shard table can mix both.
#[derive(Debug, Clone)]
pub enum StoreHandle {
    Local(Arc<ConcurrentStore>),
    Remote(Arc<RemoteStore>),
}

impl From<ConcurrentStore> for StoreHandle {
    fn from(store: ConcurrentStore) -> Self {
        Self::Local(Arc::new(store))
    }
}

impl From<Arc<ConcurrentStore>> for StoreHandle {
    fn from(store: Arc<ConcurrentStore>) -> Self {
        Self::Local(store)
    }
}

impl From<RemoteStore> for StoreHandle {
    fn from(store: RemoteStore) -> Self {
        Self::Remote(Arc::new(store))
    }
}

impl Store for StoreHandle {
    fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        match self {
            Self::Local(store) => store.get(key),
            Self::Remote(store) => store.get(key),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        match self {
            Self::Local(store) => store.put(key, value),
            Self::Remote(store) => store.put(key, value),
        }
    }

    fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        match self {
            Self::Local(store) => store.remove(key),
            Self::Remote(store) => store.remove(key),
        }
    }

    fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        match self {
            Self::Local(store) => store.iterate(config),
            Self::Remote(store) => store.iterate(config),
        }
    }

    fn size(&self) -> CabinetResult<u64> {
        match self {
            Self::Local(store) => store.size(),
            Self::Remote(store) => store.size(),
        }
    }

    fn clear(&self) -> CabinetResult<()> {
        match self {
            Self::Local(store) => store.clear(),
            Self::Remote(store) => store.clear(),
        }
    }

    fn close(&self) -> CabinetResult<()> {
        match self {
            Self::Local(store) => store.close(),
            Self::Remote(store) => store.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> ConcurrentStore {
        let store = ConcurrentStore::in_memory();
        Store::put_all(&store, [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]).unwrap();
        store
    }

    #[test]
    fn test_map_helpers() {
        let store = filled();
        assert!(Store::contains_key(&store, b"a").unwrap());
        assert!(!Store::contains_key(&store, b"z").unwrap());
        assert!(Store::contains_value(&store, b"2").unwrap());
        assert!(!Store::contains_value(&store, b"9").unwrap());
        assert_eq!(Store::keys(&store).unwrap().len(), 3);
        assert_eq!(Store::values(&store).unwrap().len(), 3);
        assert!(!Store::is_empty(&store).unwrap());
        assert_eq!(Store::size_i32(&store).unwrap(), 3);
    }

    #[test]
    fn test_equal_maps_hash_equally() {
        let left = filled();
        let right = ConcurrentStore::in_memory();
        Store::put_all(&right, [(b"c", b"3"), (b"a", b"1"), (b"b", b"2")]).unwrap();
        assert_eq!(
            Store::hash_code(&left).unwrap(),
            Store::hash_code(&right).unwrap()
        );

        right.put(b"b", b"changed").unwrap();
        assert_ne!(
            Store::hash_code(&left).unwrap(),
            Store::hash_code(&right).unwrap()
        );
    }

    #[test]
    fn test_handle_delegates_to_local() {
        let handle = StoreHandle::from(ConcurrentStore::in_memory());
        assert_eq!(handle.put(b"k", b"v").unwrap(), None);
        assert_eq!(handle.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(handle.size().unwrap(), 1);
        handle.close().unwrap();
        assert!(matches!(handle.get(b"k"), Err(CabinetError::Closed)));
    }
}
