//! Singleflight loader: collapses concurrent misses for the same key into
//! a single fetch, writing the result through to the cache.
//!
//! Grounded on `db/persistance/dumper.rs`/`workers/evictor/evictor.rs`'s
//! use of channel-based coordination (oneshot/broadcast) between an
//! in-flight operation and its waiters, adapted here into a per-key
//! leader/follower rendezvous. Deliberately orthogonal to the policy core
//! (spec.md §9, §4.10): a loader miss writes through `Cache::set` exactly
//! like any other caller-supplied value, so admission is decided the same
//! way regardless of whether the value came from a loader or not.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cache::Cache;
use crate::error::LoaderError;

struct InFlight<V, E> {
    notify: Notify,
    result: OnceLock<Result<V, E>>,
}

/// Retires the in-flight slot and wakes every waiter on drop, whether the
/// leader returned normally or its task was aborted/panicked partway
/// through `fetch` — a stale slot would otherwise leave later callers for
/// the same key waiting on a `Notify` nobody will ever fire again.
struct LeaderGuard<'a, K, V, E> {
    in_flight: &'a Mutex<HashMap<K, Arc<InFlight<V, E>>>>,
    key: K,
    notify: &'a Notify,
}

impl<K: Eq + Hash, V, E> Drop for LeaderGuard<'_, K, V, E> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
        self.notify.notify_waiters();
    }
}

/// Wraps a [`Cache`] with singleflight fetch-on-miss semantics.
pub struct Loader<K, V, E> {
    cache: Arc<Cache<K, V>>,
    in_flight: Mutex<HashMap<K, Arc<InFlight<V, E>>>>,
}

impl<K, V, E> Loader<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<Cache<K, V>>) -> Self {
        Self { cache, in_flight: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached value for `key`, or runs `fetch` to produce one.
    /// If another caller is already fetching the same key, this call
    /// waits for that fetch instead of starting a second one.
    pub async fn get_or_load<F, Fut>(&self, key: K, fetch: F) -> Result<V, LoaderError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.cache.get(&key) {
            return Ok(v);
        }

        let (is_leader, slot) = {
            let mut guard = self.in_flight.lock();
            if let Some(existing) = guard.get(&key) {
                (false, existing.clone())
            } else {
                let slot = Arc::new(InFlight { notify: Notify::new(), result: OnceLock::new() });
                guard.insert(key.clone(), slot.clone());
                (true, slot)
            }
        };

        if is_leader {
            // If `fetch` (or this task) panics before the result is ever
            // set, this still retires the slot and wakes any followers
            // instead of leaving them waiting forever — they observe an
            // empty slot and report `Abandoned`.
            let _guard = LeaderGuard { in_flight: &self.in_flight, key: key.clone(), notify: &slot.notify };
            let result = fetch().await;
            let _ = slot.result.set(result.clone());

            return match result {
                Ok(v) => {
                    let cost = self.cache.cost_fn.load().as_ref().map(|f| f(&v)).unwrap_or(1);
                    self.cache.set(key, v.clone(), cost).await;
                    Ok(v)
                }
                Err(e) => Err(LoaderError::Fetch(e)),
            };
        }

        loop {
            let notified = slot.notify.notified();
            if let Some(result) = slot.result.get() {
                return result.clone().map_err(LoaderError::Fetch);
            }
            notified.await;
            // The leader's `LeaderGuard` fires on every exit path,
            // including an abort/panic before `result` was ever set.
            return match slot.result.get() {
                Some(result) => result.clone().map_err(LoaderError::Fetch),
                None => Err(LoaderError::Abandoned),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CacheBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn single_fetch_for_concurrent_misses() {
        let cache: Arc<Cache<u64, u64>> = Arc::new(CacheBuilder::new(100).build().unwrap());
        let loader: Arc<Loader<u64, u64, String>> = Arc::new(Loader::new(cache));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = loader.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                loader
                    .get_or_load(1, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok::<u64, String>(42)
                        }
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_is_propagated() {
        let cache: Arc<Cache<u64, u64>> = Arc::new(CacheBuilder::new(100).build().unwrap());
        let loader: Loader<u64, u64, String> = Loader::new(cache);
        let result = loader.get_or_load(7, || async { Err::<u64, String>("boom".into()) }).await;
        assert!(matches!(result, Err(LoaderError::Fetch(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn follower_sees_abandoned_when_leader_task_is_aborted() {
        let cache: Arc<Cache<u64, u64>> = Arc::new(CacheBuilder::new(100).build().unwrap());
        let loader: Arc<Loader<u64, u64, String>> = Arc::new(Loader::new(cache));

        let leader = {
            let loader = loader.clone();
            tokio::spawn(async move {
                loader
                    .get_or_load(1, || async {
                        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                        Ok::<u64, String>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let follower = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.get_or_load(1, || async { unreachable!() }).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        leader.abort();
        let result = follower.await.unwrap();
        assert!(matches!(result, Err(LoaderError::Abandoned)));
    }
}
