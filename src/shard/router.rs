//! Shard router.
//!
//! Composes N stores behind one logical store. Point operations go to the
//! single shard the routing function picks. Iteration, size, clear and
//! close fan out to every shard on scoped OS threads and wait for all of
//! them before combining.
//!
//! Shards are not deduplicated: listing one physical store twice counts its
//! entries twice.

use super::function::{HashShardFunction, ShardFunction};
use crate::core::error::{CabinetError, CabinetResult};
use crate::store::{Store, StoreHandle};
use crate::worker::Worker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::Span;

/// Result of a fan-out that tolerates failed shards.
#[derive(Debug)]
pub struct FanOut<W> {
    /// Combination of every shard that succeeded. `None` if none did.
    pub worker: Option<W>,
    /// Failed shards by ascending index.
    pub failures: Vec<(usize, CabinetError)>,
}

impl<W> FanOut<W> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The combined worker, or the lowest-index failure.
    pub fn into_result(self) -> CabinetResult<W> {
        if let Some((index, error)) = self.failures.into_iter().next() {
            return Err(CabinetError::shard(index, error));
        }
        self.worker
            .ok_or_else(|| CabinetError::configuration("fan-out produced no result"))
    }
}

/// One logical store over N shards.
pub struct ShardRouter<S: Store = StoreHandle> {
    shards: Vec<S>,
    function: Box<dyn ShardFunction>,
    closed: AtomicBool,
    span: Span,
}

impl<S: Store> ShardRouter<S> {
    /// Route with `xxhash64(key) mod N`.
    pub fn new(shards: Vec<S>) -> CabinetResult<Self> {
        let function = HashShardFunction::new(shards.len());
        Self::with_function(shards, function)
    }

    /// Route with a custom function.
    pub fn with_function(
        shards: Vec<S>,
        function: impl ShardFunction + 'static,
    ) -> CabinetResult<Self> {
        if shards.is_empty() {
            return Err(CabinetError::configuration(
                "a shard router needs at least one shard",
            ));
        }
        Ok(Self {
            shards,
            function: Box::new(function),
            closed: AtomicBool::new(false),
            span: Span::none(),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[S] {
        &self.shards
    }

    /// Index of the shard owning `key`.
    pub fn shard_for(&self, key: &[u8]) -> CabinetResult<usize> {
        let index = self.function.pick_shard(key);
        if index >= self.shards.len() {
            return Err(CabinetError::configuration(format!(
                "routing function returned shard {} but only {} exist",
                index,
                self.shards.len()
            )));
        }
        Ok(index)
    }

    fn route(&self, key: &[u8]) -> CabinetResult<&S> {
        self.check_open()?;
        let index = self.shard_for(key)?;
        Ok(&self.shards[index])
    }

    fn check_open(&self) -> CabinetResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CabinetError::Closed);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        self.route(key)?.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        self.route(key)?.put(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        self.route(key)?.remove(key)
    }

    /// Run `op` on every shard concurrently. Results come back in
    /// completion order, after every shard has finished.
    fn fan_out<T, F>(&self, operation: &'static str, op: F) -> Vec<(usize, CabinetResult<T>)>
    where
        T: Send,
        F: Fn(&S) -> CabinetResult<T> + Sync,
    {
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for (index, shard) in self.shards.iter().enumerate() {
                let shard_tx = tx.clone();
                let op = &op;
                let spawned = thread::Builder::new()
                    .name(format!("cabinet-shard-{}", index))
                    .spawn_scoped(scope, move || {
                        let _ = shard_tx.send((index, op(shard)));
                    });
                if let Err(e) = spawned {
                    let _ = tx.send((
                        index,
                        Err(CabinetError::transport(format!(
                            "failed to spawn {} worker thread: {}",
                            operation, e
                        ))),
                    ));
                }
            }
        });
        drop(tx);
        rx.into_iter().collect()
    }

    /// Fan out and split results into values and failures by index.
    fn gather<T, F>(&self, operation: &'static str, op: F) -> (Vec<T>, Vec<(usize, CabinetError)>)
    where
        T: Send,
        F: Fn(&S) -> CabinetResult<T> + Sync,
    {
        let mut values = Vec::with_capacity(self.shards.len());
        let mut failures = Vec::new();
        for (index, result) in self.fan_out(operation, op) {
            match result {
                Ok(value) => values.push(value),
                Err(error) => failures.push((index, error)),
            }
        }
        failures.sort_by_key(|(index, _)| *index);
        if !failures.is_empty() {
            tracing::warn!(
                parent: &self.span,
                operation,
                failed = failures.len(),
                shards = self.shards.len(),
                "fan-out had failing shards"
            );
        }
        (values, failures)
    }

    /// Run `W` on every shard and combine the partial workers.
    ///
    /// Fail-fast: if any shard fails, the lowest-index failure is returned
    /// once every shard has finished.
    pub fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        self.iterate_partial::<W>(config)?.into_result()
    }

    /// Like `iterate`, but keeps the combined result of the shards that
    /// succeeded alongside the failures.
    pub fn iterate_partial<W: Worker>(&self, config: &W::Config) -> CabinetResult<FanOut<W>> {
        self.check_open()?;
        let (workers, failures) = self.gather("iterate", |shard| shard.iterate::<W>(config));

        // Combine in completion order, starting from the first finisher.
        let mut combined: Option<W> = None;
        for worker in workers {
            match combined.as_mut() {
                Some(acc) => acc.combine(worker),
                None => combined = Some(worker),
            }
        }

        tracing::debug!(
            parent: &self.span,
            worker = W::TAG,
            shards = self.shards.len(),
            failed = failures.len(),
            "fan-out iteration finished"
        );
        Ok(FanOut {
            worker: combined,
            failures,
        })
    }

    /// Sum of every shard's size.
    pub fn size(&self) -> CabinetResult<u64> {
        self.check_open()?;
        let (sizes, failures) = self.gather("size", |shard| shard.size());
        if let Some((index, error)) = failures.into_iter().next() {
            return Err(CabinetError::shard(index, error));
        }
        Ok(sizes.into_iter().sum())
    }

    pub fn clear(&self) -> CabinetResult<()> {
        self.check_open()?;
        let (_, failures) = self.gather("clear", |shard| shard.clear());
        if let Some((index, error)) = failures.into_iter().next() {
            return Err(CabinetError::shard(index, error));
        }
        Ok(())
    }

    /// Close every shard. The router is unusable afterward; a second close
    /// is a no-op.
    pub fn close(&self) -> CabinetResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (_, failures) = self.gather("close", |shard| shard.close());
        tracing::info!(parent: &self.span, shards = self.shards.len(), "shard router closed");
        if let Some((index, error)) = failures.into_iter().next() {
            return Err(CabinetError::shard(index, error));
        }
        Ok(())
    }
}

impl<S: Store> Store for ShardRouter<S> {
    fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        ShardRouter::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        ShardRouter::put(self, key, value)
    }

    fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        ShardRouter::remove(self, key)
    }

    fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        ShardRouter::iterate(self, config)
    }

    fn size(&self) -> CabinetResult<u64> {
        ShardRouter::size(self)
    }

    fn clear(&self) -> CabinetResult<()> {
        ShardRouter::clear(self)
    }

    fn close(&self) -> CabinetResult<()> {
        ShardRouter::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ConcurrentStore;
    use crate::worker::library::{CountEntries, MakeKeySet};
    use std::sync::Arc;

    fn local_router(n: usize) -> ShardRouter<Arc<ConcurrentStore>> {
        let shards = (0..n).map(|_| Arc::new(ConcurrentStore::in_memory())).collect();
        ShardRouter::new(shards).unwrap()
    }

    #[test]
    fn test_empty_table_rejected() {
        let result = ShardRouter::<Arc<ConcurrentStore>>::new(Vec::new());
        assert!(matches!(result, Err(CabinetError::Configuration { .. })));
    }

    #[test]
    fn test_point_ops_hit_one_shard() {
        let router = local_router(3);
        router.put(b"key", b"value").unwrap();
        let owner = router.shard_for(b"key").unwrap();
        for (index, shard) in router.shards().iter().enumerate() {
            let expected = if index == owner { 1 } else { 0 };
            assert_eq!(shard.size().unwrap(), expected);
        }
        assert_eq!(router.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(router.remove(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_fan_out_combines_all_shards() {
        let router = local_router(4);
        for i in 0..100u32 {
            router.put(&i.to_be_bytes(), b"x").unwrap();
        }
        let count = router.iterate::<CountEntries>(&()).unwrap();
        assert_eq!(count.count, 100);
        assert_eq!(count.initialize_calls, 4);
        assert_eq!(count.shutdown_calls, 4);
        assert_eq!(router.size().unwrap(), 100);
        assert_eq!(router.iterate::<MakeKeySet>(&()).unwrap().keys.len(), 100);

        router.clear().unwrap();
        assert_eq!(router.size().unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_function_is_configuration_error() {
        let shards = vec![Arc::new(ConcurrentStore::in_memory())];
        let router = ShardRouter::with_function(shards, |_: &[u8]| 5).unwrap();
        assert!(matches!(
            router.put(b"k", b"v"),
            Err(CabinetError::Configuration { .. })
        ));
    }

    #[test]
    fn test_fail_fast_and_partial() {
        let shards: Vec<_> = (0..3).map(|_| Arc::new(ConcurrentStore::in_memory())).collect();
        let router = ShardRouter::with_function(shards, |key: &[u8]| key[0] as usize % 3).unwrap();
        for i in 0..9u8 {
            router.put(&[i], b"x").unwrap();
        }
        router.shards()[1].close().unwrap();

        match router.iterate::<CountEntries>(&()) {
            Err(CabinetError::Shard { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, CabinetError::Closed));
            }
            other => panic!("expected shard failure, got {:?}", other.map(|w| w.count)),
        }

        let partial = router.iterate_partial::<CountEntries>(&()).unwrap();
        assert!(!partial.is_complete());
        assert_eq!(partial.failures.len(), 1);
        assert_eq!(partial.worker.unwrap().count, 6);
    }

    #[test]
    fn test_closed_router() {
        let router = local_router(2);
        router.close().unwrap();
        router.close().unwrap();
        assert!(matches!(router.get(b"k"), Err(CabinetError::Closed)));
        assert!(matches!(router.size(), Err(CabinetError::Closed)));
        assert!(router.shards()[0].size().is_err());
    }
}
