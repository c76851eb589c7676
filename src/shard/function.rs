//! Shard routing functions.
//!
//! A routing function maps a key to a shard index. It must be pure and
//! stable: the same key always lands on the same shard, for the lifetime of
//! the data. The router rejects indices outside its table.

use crate::core::codec::digest;

/// Maps keys to shard indices.
pub trait ShardFunction: Send + Sync {
    fn pick_shard(&self, key: &[u8]) -> usize;
}

impl<F> ShardFunction for F
where
    F: Fn(&[u8]) -> usize + Send + Sync,
{
    fn pick_shard(&self, key: &[u8]) -> usize {
        self(key)
    }
}

/// `xxhash64(key) mod shard_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashShardFunction {
    shard_count: usize,
    seed: u64,
}

impl HashShardFunction {
    pub fn new(shard_count: usize) -> Self {
        Self::with_seed(shard_count, 0)
    }

    /// Different seeds give independent placements of the same keys.
    pub fn with_seed(shard_count: usize, seed: u64) -> Self {
        Self { shard_count, seed }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

impl ShardFunction for HashShardFunction {
    fn pick_shard(&self, key: &[u8]) -> usize {
        if self.shard_count == 0 {
            return 0;
        }
        (digest(key, self.seed) % self.shard_count as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_function_is_stable_and_in_range() {
        let function = HashShardFunction::new(7);
        for i in 0..1000u32 {
            let key = i.to_be_bytes();
            let shard = function.pick_shard(&key);
            assert!(shard < 7);
            assert_eq!(shard, function.pick_shard(&key));
        }
    }

    #[test]
    fn test_hash_function_spreads_keys() {
        let function = HashShardFunction::new(4);
        let mut counts = [0usize; 4];
        for i in 0..4000u32 {
            counts[function.pick_shard(&i.to_be_bytes())] += 1;
        }
        for count in counts {
            assert!(count > 700, "uneven spread: {:?}", counts);
        }
    }

    #[test]
    fn test_seed_changes_placement() {
        let a = HashShardFunction::with_seed(16, 1);
        let b = HashShardFunction::with_seed(16, 2);
        let moved = (0..256u32)
            .filter(|i| a.pick_shard(&i.to_be_bytes()) != b.pick_shard(&i.to_be_bytes()))
            .count();
        assert!(moved > 0);
    }

    #[test]
    fn test_closure_function() {
        let first_byte = |key: &[u8]| key.first().map_or(0, |b| *b as usize % 3);
        assert_eq!(first_byte.pick_shard(b"\x05abc"), 2);
        assert_eq!(first_byte.pick_shard(b""), 0);
    }
}
