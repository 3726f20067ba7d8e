//! A single shard of the concurrent key/value index: a locked hash map
//! plus a lossy read ring for recording hits without serializing readers
//! behind the maintenance loop.
//!
//! Grounded on `db/storage/shard.rs`'s `Shard<V>` (an `RwLock`-guarded map
//! with atomic mem/len counters and an attached hit queue), adapted to a
//! generic `K`/`V` pair and fingerprint-keyed storage (spec.md §3: the
//! shard stores the full key alongside the value to resolve fingerprint
//! collisions, since fingerprints are not assumed collision-free).

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::rings::ReadRing;

/// One slot in a shard's map: the full key (for collision resolution),
/// the value, its cost, and the policy arena index tracking it.
pub struct ShardEntry<K, V> {
    pub key: K,
    pub value: V,
    pub cost: i64,
    pub arena_idx: u32,
    /// Absolute wheel tick this entry expires at, if it has a TTL.
    pub expires_tick: Option<u64>,
}

pub struct Shard<K, V> {
    data: RwLock<HashMap<u64, ShardEntry<K, V>>>,
    mem: AtomicI64,
    len: AtomicUsize,
    pub reads: ReadRing,
}

impl<K: Eq, V: Clone> Shard<K, V> {
    pub fn new(read_ring_capacity: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            mem: AtomicI64::new(0),
            len: AtomicUsize::new(0),
            reads: ReadRing::new(read_ring_capacity),
        }
    }

    /// Looks up `fp`, confirming the full key matches to rule out a
    /// fingerprint collision. Records the hit on the read ring on success.
    pub fn get(&self, fp: u64, key: &K) -> Option<V> {
        let data = self.data.read();
        let entry = data.get(&fp)?;
        if &entry.key != key {
            return None;
        }
        self.reads.record(fp);
        Some(entry.value.clone())
    }

    /// Looks up `fp` without recording a hit or cloning the value; used by
    /// the maintenance loop and range scans where hit accounting happens
    /// elsewhere.
    pub fn peek(&self, fp: u64, key: &K) -> bool {
        let data = self.data.read();
        data.get(&fp).is_some_and(|e| &e.key == key)
    }

    /// Inserts or overwrites a slot, returning the replaced entry's cost
    /// (if any) so the caller can reconcile the shard's memory counter.
    pub fn insert(&self, fp: u64, entry: ShardEntry<K, V>) -> Option<ShardEntry<K, V>> {
        let mut data = self.data.write();
        let cost = entry.cost;
        let prev = data.insert(fp, entry);
        match &prev {
            Some(old) => self.mem.fetch_add(cost - old.cost, Ordering::Relaxed),
            None => {
                self.mem.fetch_add(cost, Ordering::Relaxed);
                self.len.fetch_add(1, Ordering::Relaxed);
                0
            }
        };
        prev
    }

    pub fn remove(&self, fp: u64, key: &K) -> Option<ShardEntry<K, V>> {
        let mut data = self.data.write();
        if !data.get(&fp).is_some_and(|e| &e.key == key) {
            return None;
        }
        let entry = data.remove(&fp)?;
        self.mem.fetch_sub(entry.cost, Ordering::Relaxed);
        self.len.fetch_sub(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Removes by fingerprint alone, without a key check. Used when the
    /// maintenance loop evicts by fingerprint (it never holds a `K`).
    pub fn remove_by_fp(&self, fp: u64) -> Option<ShardEntry<K, V>> {
        let mut data = self.data.write();
        let entry = data.remove(&fp)?;
        self.mem.fetch_sub(entry.cost, Ordering::Relaxed);
        self.len.fetch_sub(1, Ordering::Relaxed);
        Some(entry)
    }

    pub fn update_cost(&self, fp: u64, new_cost: i64) -> bool {
        let mut data = self.data.write();
        let Some(entry) = data.get_mut(&fp) else { return false };
        self.mem.fetch_add(new_cost - entry.cost, Ordering::Relaxed);
        entry.cost = new_cost;
        true
    }

    pub fn set_expiry(&self, fp: u64, expires_tick: Option<u64>) -> bool {
        let mut data = self.data.write();
        let Some(entry) = data.get_mut(&fp) else { return false };
        entry.expires_tick = expires_tick;
        true
    }

    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.mem.store(0, Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem(&self) -> i64 {
        self.mem.load(Ordering::Relaxed)
    }

    /// Invokes `f` for every key/value currently in the shard. Takes the
    /// read lock for the duration; intended for `Cache::range`-style full
    /// scans, not hot-path access.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let data = self.data.read();
        for entry in data.values() {
            f(&entry.key, &entry.value);
        }
    }

    /// Like [`Self::for_each`], but also exposes each entry's cost and
    /// expiry tick. Used by snapshot serialization.
    pub fn for_each_entry(&self, mut f: impl FnMut(&K, &V, i64, Option<u64>)) {
        let data = self.data.read();
        for entry in data.values() {
            f(&entry.key, &entry.value, entry.cost, entry.expires_tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u64, value: u64, cost: i64) -> ShardEntry<u64, u64> {
        ShardEntry { key, value, cost, arena_idx: 0, expires_tick: None }
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let shard: Shard<u64, u64> = Shard::new(16);
        shard.insert(1, entry(1, 100, 5));
        assert_eq!(shard.get(1, &1), Some(100));
        assert_eq!(shard.mem(), 5);
        assert_eq!(shard.len(), 1);
        let removed = shard.remove(1, &1);
        assert!(removed.is_some());
        assert_eq!(shard.mem(), 0);
        assert_eq!(shard.len(), 0);
    }

    #[test]
    fn collision_on_fingerprint_is_rejected_by_key_check() {
        let shard: Shard<u64, u64> = Shard::new(16);
        shard.insert(1, entry(42, 100, 5));
        assert_eq!(shard.get(1, &99), None);
    }

    #[test]
    fn overwrite_reconciles_cost_without_double_counting_len() {
        let shard: Shard<u64, u64> = Shard::new(16);
        shard.insert(1, entry(1, 100, 5));
        shard.insert(1, entry(1, 200, 9));
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.mem(), 9);
    }
}
