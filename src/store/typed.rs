//! Typed facade over a byte store.

use super::Store;
use crate::core::codec;
use crate::core::error::CabinetResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Map of `K` to `V` stored through the codec in any `Store`.
///
/// Keys are encoded deterministically, so equal keys route to the same shard
/// when `S` is a shard router.
pub struct TypedMap<S, K, V> {
    store: S,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<S, K, V> TypedMap<S, K, V>
where
    S: Store,
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _types: PhantomData,
        }
    }

    pub fn get(&self, key: &K) -> CabinetResult<Option<V>> {
        let key = codec::encode(key)?;
        self.store
            .get(&key)?
            .map(|bytes| codec::decode(&bytes))
            .transpose()
    }

    pub fn put(&self, key: &K, value: &V) -> CabinetResult<Option<V>> {
        let key = codec::encode(key)?;
        let value = codec::encode(value)?;
        self.store
            .put(&key, &value)?
            .map(|bytes| codec::decode(&bytes))
            .transpose()
    }

    pub fn remove(&self, key: &K) -> CabinetResult<Option<V>> {
        let key = codec::encode(key)?;
        self.store
            .remove(&key)?
            .map(|bytes| codec::decode(&bytes))
            .transpose()
    }

    pub fn contains_key(&self, key: &K) -> CabinetResult<bool> {
        self.store.contains_key(&codec::encode(key)?)
    }

    pub fn contains_value(&self, value: &V) -> CabinetResult<bool> {
        self.store.contains_value(&codec::encode(value)?)
    }

    /// Every key, decoded. Order follows the encoded bytes.
    pub fn keys(&self) -> CabinetResult<Vec<K>> {
        self.store
            .keys()?
            .iter()
            .map(|bytes| codec::decode(bytes))
            .collect()
    }

    pub fn values(&self) -> CabinetResult<Vec<V>> {
        self.store
            .values()?
            .iter()
            .map(|bytes| codec::decode(bytes))
            .collect()
    }

    pub fn size(&self) -> CabinetResult<u64> {
        self.store.size()
    }

    pub fn is_empty(&self) -> CabinetResult<bool> {
        self.store.is_empty()
    }

    pub fn clear(&self) -> CabinetResult<()> {
        self.store.clear()
    }

    /// The underlying byte store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CabinetError;
    use crate::storage::ConcurrentStore;

    #[test]
    fn test_typed_round_trip() {
        let map: TypedMap<_, String, u64> = TypedMap::new(ConcurrentStore::in_memory());
        assert_eq!(map.put(&"apples".to_string(), &3).unwrap(), None);
        assert_eq!(map.put(&"apples".to_string(), &5).unwrap(), Some(3));
        assert_eq!(map.get(&"apples".to_string()).unwrap(), Some(5));
        assert!(map.contains_value(&5).unwrap());
        assert_eq!(map.keys().unwrap(), vec!["apples".to_string()]);
        assert_eq!(map.remove(&"apples".to_string()).unwrap(), Some(5));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn test_foreign_bytes_fail_to_decode() {
        let store = ConcurrentStore::in_memory();
        let key = codec::encode(&1u32).unwrap();
        store.put(&key, &[0xff]).unwrap();

        let map: TypedMap<_, u32, String> = TypedMap::new(store);
        assert!(matches!(map.get(&1), Err(CabinetError::Codec { .. })));
    }
}
