//! Tag to worker runner registry.
//!
//! The server resolves the tag of an ITERATE command here. A runner decodes
//! the config, drives the worker over the local store and encodes the
//! finished worker for the reply.

use super::library::{
    CountEntries, FindValue, HashCode, MakeKeySet, MakeValueCollection, RemoveAll,
};
use super::Worker;
use crate::core::codec;
use crate::core::error::{CabinetError, CabinetResult};
use crate::storage::ConcurrentStore;
use std::collections::HashMap;

type Runner = fn(&ConcurrentStore, &[u8]) -> CabinetResult<Vec<u8>>;

fn run_worker<W: Worker>(store: &ConcurrentStore, config: &[u8]) -> CabinetResult<Vec<u8>> {
    let config: W::Config = codec::decode(config)?;
    let worker = store.iterate::<W>(&config)?;
    codec::encode(&worker)
}

/// Workers a server is able to run, keyed by `Worker::TAG`.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    runners: HashMap<&'static str, Runner>,
}

impl WorkerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every reference worker.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register::<CountEntries>()
            .register::<FindValue>()
            .register::<MakeKeySet>()
            .register::<MakeValueCollection>()
            .register::<RemoveAll>()
            .register::<HashCode>();
        registry
    }

    /// Register `W` under its tag, replacing any previous entry.
    pub fn register<W: Worker>(&mut self) -> &mut Self {
        self.runners.insert(W::TAG, run_worker::<W>);
        self
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.runners.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.runners.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Run the worker registered under `tag` with an encoded config.
    pub fn run(&self, tag: &str, store: &ConcurrentStore, config: &[u8]) -> CabinetResult<Vec<u8>> {
        let runner = self
            .runners
            .get(tag)
            .ok_or_else(|| CabinetError::UnknownWorker {
                tag: tag.to_string(),
            })?;
        runner(store, config)
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::library::FindValueConfig;

    #[test]
    fn test_builtin_tags() {
        let registry = WorkerRegistry::with_builtin();
        assert_eq!(
            registry.tags(),
            vec![
                "count-entries",
                "find-value",
                "hash-code",
                "make-key-set",
                "make-value-collection",
                "remove-all",
            ]
        );
    }

    #[test]
    fn test_run_decodes_config_and_encodes_worker() {
        let store = ConcurrentStore::in_memory();
        store.put(b"k", b"needle").unwrap();

        let registry = WorkerRegistry::with_builtin();
        let config = codec::encode(&FindValueConfig {
            target: b"needle".to_vec(),
        })
        .unwrap();
        let bytes = registry.run(FindValue::TAG, &store, &config).unwrap();
        let worker: FindValue = codec::decode(&bytes).unwrap();
        assert!(worker.found);
    }

    #[test]
    fn test_unknown_tag() {
        let store = ConcurrentStore::in_memory();
        let registry = WorkerRegistry::new();
        let err = registry.run("nope", &store, &[]).unwrap_err();
        assert!(matches!(err, CabinetError::UnknownWorker { ref tag } if tag == "nope"));
    }
}
