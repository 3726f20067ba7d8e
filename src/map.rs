//! Sharded key/value index: routes fingerprints to one of a fixed number
//! of independently locked shards.
//!
//! Grounded on `db/storage/map.rs`'s `Map<V>` (fixed shard count, mask-based
//! routing via `shard()`/`next_shard()`), with the shard count derived from
//! capacity/parallelism instead of the teacher's fixed `NUM_OF_SHARDS =
//! 1024` — a library meant to be embedded at arbitrary sizes (spec.md's
//! "size-bounded" cache might hold a few dozen entries in a test or
//! millions in production) shouldn't always pay for 1024 shards.

use crate::hasher::next_pow2;
use crate::shard::{Shard, ShardEntry};

pub struct ShardedMap<K, V> {
    shards: Vec<Shard<K, V>>,
    mask: u64,
}

impl<K: Eq, V: Clone> ShardedMap<K, V> {
    /// Builds a map with a power-of-two shard count sized from `capacity`
    /// and the available parallelism, capped to keep small caches cheap.
    pub fn new(capacity: usize, read_ring_capacity: usize) -> Self {
        let by_parallelism = next_pow2(num_cpus::get() * 4);
        let by_capacity = next_pow2((capacity / 64).max(1));
        let shard_count = by_parallelism.min(by_capacity.max(1)).clamp(1, 1024);

        Self {
            shards: (0..shard_count).map(|_| Shard::new(read_ring_capacity)).collect(),
            mask: shard_count as u64 - 1,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn shard_for(&self, fp: u64) -> &Shard<K, V> {
        &self.shards[(fp & self.mask) as usize]
    }

    pub fn shards(&self) -> &[Shard<K, V>] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem(&self) -> i64 {
        self.shards.iter().map(Shard::mem).sum()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    pub fn get(&self, fp: u64, key: &K) -> Option<V> {
        self.shard_for(fp).get(fp, key)
    }

    pub fn insert(&self, fp: u64, entry: ShardEntry<K, V>) -> Option<ShardEntry<K, V>> {
        self.shard_for(fp).insert(fp, entry)
    }

    pub fn remove(&self, fp: u64, key: &K) -> Option<ShardEntry<K, V>> {
        self.shard_for(fp).remove(fp, key)
    }

    pub fn remove_by_fp(&self, fp: u64) -> Option<ShardEntry<K, V>> {
        self.shard_for(fp).remove_by_fp(fp)
    }

    /// Invokes `f` for every key/value across all shards. Takes each
    /// shard's read lock in turn.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in &self.shards {
            shard.for_each(&mut f);
        }
    }

    /// Like [`Self::for_each`], but also exposes each entry's cost and
    /// expiry tick. Used by snapshot serialization.
    pub fn for_each_entry(&self, mut f: impl FnMut(&K, &V, i64, Option<u64>)) {
        for shard in &self.shards {
            shard.for_each_entry(&mut f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardEntry;

    #[test]
    fn routes_and_finds() {
        let map: ShardedMap<u64, u64> = ShardedMap::new(1000, 64);
        for fp in 0..200u64 {
            map.insert(
                fp,
                ShardEntry { key: fp, value: fp * 10, cost: 1, arena_idx: 0, expires_tick: None },
            );
        }
        for fp in 0..200u64 {
            assert_eq!(map.get(fp, &fp), Some(fp * 10));
        }
        assert_eq!(map.len(), 200);
    }

    #[test]
    fn shard_count_is_power_of_two() {
        let map: ShardedMap<u64, u64> = ShardedMap::new(1_000_000, 64);
        assert!(map.shard_count().is_power_of_two());
    }
}
