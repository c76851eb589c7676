//! Reference workers.

use super::Worker;
use crate::core::codec::digest;
use crate::core::error::CabinetResult;
use crate::storage::engine::EngineView;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Counts entries and records how often each exclusive phase ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntries {
    pub count: u64,
    pub initialize_calls: u32,
    pub shutdown_calls: u32,
}

impl Worker for CountEntries {
    const TAG: &'static str = "count-entries";
    type Config = ();

    fn initialize(&mut self, _store: &mut EngineView<'_>, _config: &()) -> CabinetResult<()> {
        self.initialize_calls += 1;
        Ok(())
    }

    fn iterate(&mut self, _key: &[u8], _value: &[u8]) -> bool {
        self.count += 1;
        false
    }

    fn shutdown(&mut self, _store: &mut EngineView<'_>) -> CabinetResult<()> {
        self.shutdown_calls += 1;
        Ok(())
    }

    fn combine(&mut self, other: Self) {
        self.count += other.count;
        self.initialize_calls += other.initialize_calls;
        self.shutdown_calls += other.shutdown_calls;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindValueConfig {
    pub target: Vec<u8>,
}

/// Looks for a value, stopping at the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindValue {
    #[serde(skip)]
    target: Vec<u8>,
    pub found: bool,
    pub scanned: u64,
}

impl Worker for FindValue {
    const TAG: &'static str = "find-value";
    type Config = FindValueConfig;

    fn initialize(&mut self, _store: &mut EngineView<'_>, config: &FindValueConfig) -> CabinetResult<()> {
        self.target = config.target.clone();
        Ok(())
    }

    fn iterate(&mut self, _key: &[u8], value: &[u8]) -> bool {
        self.scanned += 1;
        if value == self.target.as_slice() {
            self.found = true;
        }
        self.found
    }

    fn combine(&mut self, other: Self) {
        self.found |= other.found;
        self.scanned += other.scanned;
    }
}

/// Collects every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeKeySet {
    pub keys: BTreeSet<Vec<u8>>,
}

impl Worker for MakeKeySet {
    const TAG: &'static str = "make-key-set";
    type Config = ();

    fn iterate(&mut self, key: &[u8], _value: &[u8]) -> bool {
        self.keys.insert(key.to_vec());
        false
    }

    fn combine(&mut self, other: Self) {
        self.keys.extend(other.keys);
    }
}

/// Collects every value. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeValueCollection {
    pub values: Vec<Vec<u8>>,
}

impl Worker for MakeValueCollection {
    const TAG: &'static str = "make-value-collection";
    type Config = ();

    fn iterate(&mut self, _key: &[u8], value: &[u8]) -> bool {
        self.values.push(value.to_vec());
        false
    }

    fn combine(&mut self, mut other: Self) {
        self.values.append(&mut other.values);
    }
}

/// Deletes every entry: keys are collected during the scan and removed in
/// `shutdown`, once exclusive access is back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAll {
    #[serde(skip)]
    pending: Vec<Vec<u8>>,
    pub removed: u64,
}

impl Worker for RemoveAll {
    const TAG: &'static str = "remove-all";
    type Config = ();

    fn iterate(&mut self, key: &[u8], _value: &[u8]) -> bool {
        self.pending.push(key.to_vec());
        false
    }

    fn shutdown(&mut self, store: &mut EngineView<'_>) -> CabinetResult<()> {
        for key in self.pending.drain(..) {
            store.remove(&key)?;
            self.removed += 1;
        }
        Ok(())
    }

    fn combine(&mut self, other: Self) {
        self.removed += other.removed;
    }
}

/// Order-independent hash of the whole map: the wrapping sum over entries of
/// `hash(key) ^ hash(value)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCode {
    pub hash: u64,
}

impl HashCode {
    /// Contribution of a single entry.
    pub fn entry_hash(key: &[u8], value: &[u8]) -> u64 {
        digest(key, 0) ^ digest(value, 0)
    }
}

impl Worker for HashCode {
    const TAG: &'static str = "hash-code";
    type Config = ();

    fn iterate(&mut self, key: &[u8], value: &[u8]) -> bool {
        self.hash = self.hash.wrapping_add(Self::entry_hash(key, value));
        false
    }

    fn combine(&mut self, other: Self) {
        self.hash = self.hash.wrapping_add(other.hash);
    }
}
