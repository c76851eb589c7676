//! Iteration workers.
//!
//! A worker is a serializable accumulator that a store drives through a fixed
//! life cycle:
//!
//! ```text
//! Default::default()
//!   -> initialize(view, config)   exclusive lock, may mutate
//!   -> iterate(key, value)*       shared lock, read-only, true = stop
//!   -> shutdown(view)             exclusive lock, may mutate
//!   -> combine(other)             only when partial results merge
//! ```
//!
//! Remote peers never receive behavior. They receive the worker's `TAG`
//! plus its encoded `Config`, run the worker registered under that tag, and
//! send back the encoded finished worker.

pub mod library;
pub mod registry;

pub use library::{
    CountEntries, FindValue, FindValueConfig, HashCode, MakeKeySet, MakeValueCollection, RemoveAll,
};
pub use registry::WorkerRegistry;

use crate::core::error::CabinetResult;
use crate::storage::engine::EngineView;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Accumulator driven over every entry of a store.
pub trait Worker: Serialize + DeserializeOwned + Default + Send + 'static {
    /// Stable identity shared by every peer that can run this worker.
    const TAG: &'static str;

    /// Immutable parameters supplied at construction.
    type Config: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static;

    /// Prepare under exclusive access.
    fn initialize(&mut self, _store: &mut EngineView<'_>, _config: &Self::Config) -> CabinetResult<()> {
        Ok(())
    }

    /// Visit one entry under shared access. Returning true asks to stop.
    fn iterate(&mut self, key: &[u8], value: &[u8]) -> bool;

    /// Finish under exclusive access.
    fn shutdown(&mut self, _store: &mut EngineView<'_>) -> CabinetResult<()> {
        Ok(())
    }

    /// Merge a worker that scanned a disjoint partition.
    ///
    /// Must be associative and commutative: shard results fold in
    /// completion order.
    fn combine(&mut self, other: Self);
}
