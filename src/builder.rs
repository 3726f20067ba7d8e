//! Builder for [`Cache`], replacing the teacher's YAML-driven
//! `Config`/`ConfigTrait` with a plain in-process builder: this crate is
//! a library dependency, not a standalone service, so there is no
//! deployment-time config file to parse (spec.md §6: no CLI/environment
//! surface).

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio_util::sync::CancellationToken;

use crate::cache::{warn_if_zero_capacity, Cache, CostFn};
use crate::error::CacheError;
use crate::hasher::Hasher;
use crate::map::ShardedMap;
use crate::maintenance::Maintenance;
use crate::rings::WriteBuffer;
use crate::stats::Stats;

const DEFAULT_READ_RING_CAPACITY: usize = 128;
const DEFAULT_WRITE_BUFFER_CAPACITY: usize = 4096;
/// Matches the teacher's `soft_eviction_logger` default interval.
const DEFAULT_STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct CacheBuilder<K, V> {
    capacity: i64,
    cost_fn: Option<Arc<CostFn<V>>>,
    default_ttl: Option<Duration>,
    key_projection: Option<Arc<dyn Fn(&K) -> u64 + Send + Sync>>,
    read_ring_capacity: usize,
    write_buffer_capacity: usize,
    stats_log_interval: Duration,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts a builder targeting a total cost budget of `capacity`.
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            cost_fn: None,
            default_ttl: None,
            key_projection: None,
            read_ring_capacity: DEFAULT_READ_RING_CAPACITY,
            write_buffer_capacity: DEFAULT_WRITE_BUFFER_CAPACITY,
            stats_log_interval: DEFAULT_STATS_LOG_INTERVAL,
            _marker: PhantomData,
        }
    }

    /// Sets a per-value cost function. Without one, every entry costs 1
    /// (so `capacity` behaves as an entry-count bound).
    pub fn cost_fn(mut self, f: impl Fn(&V) -> i64 + Send + Sync + 'static) -> Self {
        self.cost_fn = Some(Arc::new(f));
        self
    }

    /// Sets a TTL applied by `Cache::set`/`set_with_auto_cost` (not
    /// `set_with_ttl`, which takes its own per-call TTL regardless of
    /// this setting).
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Hashes `f(key)` instead of `key` itself, for composite keys where
    /// only part of the key should affect sharding/admission.
    pub fn key_projection(mut self, f: impl Fn(&K) -> u64 + Send + Sync + 'static) -> Self {
        self.key_projection = Some(Arc::new(f));
        self
    }

    pub fn read_ring_capacity(mut self, capacity: usize) -> Self {
        self.read_ring_capacity = capacity;
        self
    }

    pub fn write_buffer_capacity(mut self, capacity: usize) -> Self {
        self.write_buffer_capacity = capacity;
        self
    }

    /// How often the maintenance loop logs a cache-wide stats snapshot at
    /// `info` level. Defaults to 5 seconds.
    pub fn stats_log_interval(mut self, interval: Duration) -> Self {
        self.stats_log_interval = interval;
        self
    }

    /// Builds the cache and spawns its maintenance loop. Must be called
    /// from within a running Tokio runtime, since the maintenance loop is
    /// a `tokio::task`.
    pub fn build(self) -> Result<Cache<K, V>, CacheError> {
        if self.capacity <= 0 {
            return Err(CacheError::InvalidConfig);
        }
        warn_if_zero_capacity(self.capacity);

        let hasher = match self.key_projection {
            Some(f) => Hasher::with_projection(move |k: &K| f(k)),
            None => Hasher::new(),
        };

        let map = Arc::new(ShardedMap::new(self.capacity.max(1) as usize, self.read_ring_capacity));
        let writes = Arc::new(WriteBuffer::new(self.write_buffer_capacity));
        let stats = Arc::new(Stats::default());
        let shutdown = CancellationToken::new();
        let tick = Arc::new(AtomicU64::new(0));

        let maintenance = Maintenance::new(
            self.capacity,
            map.clone(),
            writes.clone(),
            stats.clone(),
            shutdown.clone(),
            tick.clone(),
            self.stats_log_interval,
        );
        let handle = tokio::spawn(maintenance.run());

        Ok(Cache {
            hasher,
            map,
            writes,
            stats,
            shutdown,
            tick,
            cost_fn: ArcSwapOption::from(self.cost_fn),
            default_ttl: self.default_ttl,
            capacity: self.capacity,
            maintenance: Some(handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nonpositive_capacity() {
        let result: Result<Cache<u64, u64>, _> = CacheBuilder::new(0).build();
        assert!(matches!(result, Err(CacheError::InvalidConfig)));
    }
}
