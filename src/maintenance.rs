//! The single-threaded maintenance loop: the sole owner of the policy
//! core, driving it from the read rings and write buffer and reconciling
//! its eviction/expiry decisions back into the shard index.
//!
//! Grounded on `workers/evictor/evictor.rs`'s `tokio::select! { shutdown,
//! tick }` task shape and structured `tracing` logging, stripped of its
//! governor-driven replica scaling: spec.md §5 gives the maintenance loop
//! to exactly one task, so there is nothing to scale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::map::ShardedMap;
use crate::policy::Policy;
use crate::rings::{WriteBuffer, WriteSignal};
use crate::stats::Stats;
use crate::wheel::TICK_MS;

/// Roughly one hour between sketch/doorkeeper aging passes, at the
/// default tick rate.
const AGE_EVERY_TICKS: u64 = 3_600_000 / TICK_MS;

pub struct Maintenance<K, V> {
    policy: Policy,
    map: Arc<ShardedMap<K, V>>,
    writes: Arc<WriteBuffer>,
    stats: Arc<Stats>,
    shutdown: CancellationToken,
    /// Published after every tick so callers computing a TTL deadline
    /// (`Cache::set_with_ttl`) don't need their own connection into the
    /// maintenance loop's internal clock.
    tick: Arc<AtomicU64>,
    stats_log_interval: Duration,
}

impl<K, V> Maintenance<K, V>
where
    K: Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        capacity: i64,
        map: Arc<ShardedMap<K, V>>,
        writes: Arc<WriteBuffer>,
        stats: Arc<Stats>,
        shutdown: CancellationToken,
        tick: Arc<AtomicU64>,
        stats_log_interval: Duration,
    ) -> Self {
        Self { policy: Policy::new(capacity), map, writes, stats, shutdown, tick, stats_log_interval }
    }

    /// Runs until cancelled. Intended to be spawned as its own
    /// `tokio::task`; `Cache::close` cancels `shutdown` to stop it.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        let mut stats_interval = tokio::time::interval(self.stats_log_interval);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(component = "maintenance", "maintenance loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.run_once();
                    ticks += 1;
                    if ticks % AGE_EVERY_TICKS == 0 {
                        self.policy.age();
                        debug!(component = "maintenance", event = "age", "frequency sketch and doorkeeper aged");
                    }
                }
                // Reacts to a fresh write signal immediately instead of
                // waiting out the rest of the current tick — callers
                // awaiting `set`'s admission decision shouldn't pay up to
                // a full tick of latency for it. Only drains signals; the
                // wheel still advances strictly once per real tick.
                _ = self.writes.notified() => {
                    self.drain_writes();
                }
                _ = stats_interval.tick() => {
                    let snap = self.stats.snapshot();
                    info!(
                        component = "maintenance",
                        event = "stats",
                        hits = snap.hits,
                        misses = snap.misses,
                        admissions = snap.admissions,
                        rejections = snap.rejections,
                        evictions = snap.evictions,
                        expirations = snap.expirations,
                        read_ring_drops = snap.read_ring_drops,
                        "cache stats"
                    );
                }
            }
        }
    }

    /// One maintenance cycle: apply queued writes, fold in sampled reads,
    /// advance the timing wheel, and reconcile any evictions/expirations
    /// into the shard index. Exposed for tests and for embedding this
    /// loop's logic in a caller-driven step function instead of a task.
    pub fn run_once(&mut self) {
        self.drain_writes();
        self.drain_reads();

        let expired = self.policy.advance();
        if !expired.is_empty() {
            for fp in &expired {
                self.map.remove_by_fp(*fp);
            }
            self.stats.record_expirations(expired.len() as u64);
        }
        self.tick.store(self.policy.current_tick(), Ordering::Relaxed);
    }

    fn drain_writes(&mut self) {
        for signal in self.writes.drain() {
            match signal {
                WriteSignal::Admit { fp, cost, ttl_tick, respond_to } => {
                    let outcome = self.policy.admit(fp, cost);
                    if outcome.admitted {
                        self.stats.record_admission();
                        self.apply_ttl(fp, ttl_tick);
                    } else {
                        self.stats.record_rejection();
                        self.map.remove_by_fp(fp);
                    }
                    self.apply_evictions(outcome.evicted);
                    if let Some(tx) = respond_to {
                        let _ = tx.send(outcome.admitted);
                    }
                }
                WriteSignal::Update { fp, cost, ttl_tick } => {
                    let evicted = self.policy.update(fp, cost);
                    self.policy.deschedule_ttl(fp);
                    self.apply_ttl(fp, ttl_tick);
                    self.apply_evictions(evicted);
                }
                WriteSignal::Delete { fp } => {
                    self.policy.delete(fp);
                }
                WriteSignal::SetDoorkeeper { enabled } => {
                    self.policy.set_doorkeeper_enabled(enabled);
                }
            }
        }
    }

    fn apply_ttl(&mut self, fp: u64, ttl_tick: Option<u64>) {
        let Some(deadline) = ttl_tick else { return };
        if !self.policy.schedule_ttl(fp, deadline) {
            // The deadline had already passed by the time the maintenance
            // loop caught up to this signal.
            self.policy.delete(fp);
            self.map.remove_by_fp(fp);
            self.stats.record_expirations(1);
        }
    }

    fn apply_evictions(&mut self, evicted: Vec<u64>) {
        if evicted.is_empty() {
            return;
        }
        for fp in &evicted {
            self.map.remove_by_fp(*fp);
        }
        self.stats.record_evictions(evicted.len() as u64);
    }

    fn drain_reads(&mut self) {
        for shard in self.map.shards() {
            for fp in shard.reads.drain() {
                self.policy.hit(fp);
            }
            let drops = shard.reads.take_drops();
            if drops > 0 {
                self.stats.read_ring_drops.fetch_add(drops, Ordering::Relaxed);
            }
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.policy.current_tick()
    }
}
