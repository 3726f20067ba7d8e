//! The public cache façade: the thin, synchronous-looking surface that
//! hides the shard index, write buffer, and maintenance loop behind it.
//!
//! Grounded on `db/db.rs`'s `DB`/`Storage` façade (a struct the caller
//! talks to that internally fans out to shards and a background worker),
//! with the worker-pool/governor machinery replaced by the single
//! maintenance task spawned in [`crate::builder::CacheBuilder::build`].

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::codec::{decode_snapshot, encode_snapshot, EntryCodec};
use crate::error::CacheError;
use crate::hasher::Hasher;
use crate::map::ShardedMap;
use crate::rings::{WriteBuffer, WriteSignal};
use crate::shard::ShardEntry;
use crate::stats::{CacheStats, Stats};
use crate::wheel::TICK_MS;

pub(crate) type CostFn<V> = dyn Fn(&V) -> i64 + Send + Sync;

pub struct Cache<K, V> {
    pub(crate) hasher: Hasher<K>,
    pub(crate) map: Arc<ShardedMap<K, V>>,
    pub(crate) writes: Arc<WriteBuffer>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tick: Arc<AtomicU64>,
    /// Runtime-swappable so `set_cost_fn` can rebind it from any caller
    /// thread without a lock (spec.md §6: `set-cost-fn` is a handle
    /// operation, not a build-time-only setting).
    pub(crate) cost_fn: ArcSwapOption<CostFn<V>>,
    pub(crate) default_ttl: Option<Duration>,
    pub(crate) capacity: i64,
    pub(crate) maintenance: Option<tokio::task::JoinHandle<()>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Looks up `key`. A hit refreshes its recency/frequency
    /// asynchronously, via the read ring the maintenance loop drains.
    pub fn get(&self, key: &K) -> Option<V> {
        let fp = self.hasher.fingerprint(key);
        match self.map.get(fp, key) {
            Some(v) => {
                self.stats.record_hit();
                Some(v)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Inserts or overwrites `key` at the given cost, using the builder's
    /// default TTL if one was configured. Returns whether the write was
    /// admitted: `false` if its cost exceeds total capacity, or — for a
    /// brand-new key — if the doorkeeper or frequency comparison rejected
    /// it. An update of an already-tracked key is always admitted; only
    /// the entries it may evict to stay within budget are asynchronous.
    pub async fn set(&self, key: K, value: V, cost: i64) -> bool {
        self.set_with_ttl(key, value, cost, self.default_ttl.unwrap_or(Duration::ZERO)).await
    }

    /// Inserts or overwrites `key` with an explicit TTL. `ttl ==
    /// Duration::ZERO` means the entry never expires. The value is
    /// visible to `get` immediately; for a fresh key, this call waits for
    /// the maintenance loop to run the doorkeeper/frequency admission
    /// decision before returning, so the returned bool reflects the real
    /// outcome rather than just the synchronous cost check.
    pub async fn set_with_ttl(&self, key: K, value: V, cost: i64, ttl: Duration) -> bool {
        let fp = self.hasher.fingerprint(&key);

        if cost > self.capacity {
            self.stats.record_rejection();
            return false;
        }

        let ttl_tick = (!ttl.is_zero()).then(|| {
            let ticks = ((ttl.as_millis() as u64) / TICK_MS).max(1);
            self.tick.load(Ordering::Relaxed) + ticks
        });

        let entry = ShardEntry { key, value, cost, arena_idx: 0, expires_tick: ttl_tick };
        let replaced = self.map.insert(fp, entry);

        if replaced.is_some() {
            self.writes.push(WriteSignal::Update { fp, cost, ttl_tick });
            return true;
        }

        let (tx, rx) = oneshot::channel();
        self.writes.push(WriteSignal::Admit { fp, cost, ttl_tick, respond_to: Some(tx) });
        // The maintenance loop always replies before dropping the sender;
        // a closed channel only happens if the loop itself was aborted.
        rx.await.unwrap_or(false)
    }

    /// Inserts or overwrites `key`, deriving its cost from the configured
    /// cost function (or `1` if none is set). Convenience wrapper over
    /// [`Self::set`] for callers that don't want to compute cost
    /// themselves.
    pub async fn set_with_auto_cost(&self, key: K, value: V) -> bool {
        let cost = self.cost_fn.load().as_ref().map(|f| f(&value)).unwrap_or(1);
        self.set(key, value, cost).await
    }

    /// Rebinds the per-value cost function used by [`Self::set_with_auto_cost`].
    /// Returns `self` for chaining, mirroring the other handle-returning
    /// configuration operations.
    pub fn set_cost_fn(&self, f: impl Fn(&V) -> i64 + Send + Sync + 'static) -> &Self {
        self.cost_fn.store(Some(Arc::new(f)));
        self
    }

    /// Enables or disables the doorkeeper admission gate. Applied
    /// asynchronously by the maintenance loop, like any other write
    /// signal.
    pub fn set_doorkeeper(&self, enabled: bool) -> &Self {
        self.writes.push(WriteSignal::SetDoorkeeper { enabled });
        self
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        let fp = self.hasher.fingerprint(key);
        let removed = self.map.remove(fp, key).is_some();
        if removed {
            self.writes.push(WriteSignal::Delete { fp });
        }
        removed
    }

    /// Number of entries currently visible in the shard index. This
    /// reflects shard mutations immediately; it does not necessarily
    /// match the policy core's admitted set at any given instant (open
    /// question resolved in favor of the cheaper, synchronous counter).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Invokes `f` for every key/value currently visible. Takes each
    /// shard's read lock in turn; not a consistent point-in-time view
    /// under concurrent writers.
    pub fn range(&self, f: impl FnMut(&K, &V)) {
        self.map.for_each(f);
    }

    /// Stops the maintenance loop. Further `get`/`set`/`delete` calls
    /// still work against the shard index, but policy state (and TTL
    /// expiry) stops advancing.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Serializes every currently-visible entry to `path` using `codec`.
    pub async fn save_snapshot(
        &self,
        path: &std::path::Path,
        codec: &dyn EntryCodec<K, V>,
        user_version: u32,
    ) -> Result<(), CacheError> {
        let now_tick = self.tick.load(Ordering::Relaxed);
        let mut entries = Vec::with_capacity(self.map.len());
        self.map.for_each_entry(|k, v, cost, expires_tick| {
            let ttl_ms_remaining = expires_tick.map(|deadline| {
                deadline.saturating_sub(now_tick) * TICK_MS
            });
            entries.push((k.clone(), v.clone(), cost, ttl_ms_remaining));
        });
        let bytes = encode_snapshot(codec, user_version, self.capacity, &entries);
        tokio::fs::write(path, bytes).await.map_err(CacheError::Io)
    }

    /// Loads entries from a snapshot written by [`Self::save_snapshot`],
    /// reinserting each through the normal `set_with_ttl` admission path.
    /// `expected_user_version`, if given, must match the snapshot's
    /// recorded version or this returns `CacheError::VersionMismatch`.
    pub async fn load_snapshot(
        &self,
        path: &std::path::Path,
        codec: &dyn EntryCodec<K, V>,
        expected_user_version: Option<u32>,
    ) -> Result<usize, CacheError> {
        let bytes = tokio::fs::read(path).await.map_err(CacheError::Io)?;
        let (_capacity, entries) = decode_snapshot(codec, &bytes, expected_user_version)?;
        let count = entries.len();
        for entry in entries {
            let ttl = entry.ttl_ms_remaining.map(Duration::from_millis).unwrap_or(Duration::ZERO);
            self.set_with_ttl(entry.key, entry.value, entry.cost, ttl).await;
        }
        Ok(count)
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.maintenance.take() {
            handle.abort();
        }
    }
}

pub(crate) fn warn_if_zero_capacity(capacity: i64) {
    if capacity == 0 {
        warn!(component = "cache", "capacity is zero; every set will be rejected");
    }
}
