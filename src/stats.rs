//! Cache-wide counters, exposed as a point-in-time snapshot.
//!
//! Grounded on `workers/evictor`/`workers/lifetimer`'s counter style
//! (plain `AtomicI64`/`AtomicU64` fields bumped from the hot path and the
//! maintenance loop, periodically logged at info level) — this crate
//! collapses the teacher's separate evictor/lifetimer counter sets into
//! one `Stats` struct since there is a single maintenance loop here
//! instead of separate scalable worker pools.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// `hits`/`misses` are bumped from every caller's thread on every
/// `get`; padding them to their own cache lines keeps that contention
/// from bleeding into the admissions/evictions counters the maintenance
/// loop writes on a completely different cadence.
#[derive(Default)]
pub struct Stats {
    pub hits: CachePadded<AtomicU64>,
    pub misses: CachePadded<AtomicU64>,
    pub admissions: AtomicU64,
    pub rejections: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub read_ring_drops: AtomicU64,
}

/// A consistent-enough snapshot of [`Stats`] for callers. Each field is
/// read independently with relaxed ordering, matching the teacher's
/// counters (which are diagnostic, not used for correctness decisions).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub admissions: u64,
    pub rejections: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub read_ring_drops: u64,
}

impl Stats {
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            read_ring_drops: self.read_ring_drops.load(Ordering::Relaxed),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission(&self) {
        self.admissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, n: u64) {
        if n > 0 {
            self.evictions.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_expirations(&self, n: u64) {
        if n > 0 {
            self.expirations.fetch_add(n, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let stats = Stats::default();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
    }
}
