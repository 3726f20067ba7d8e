//! The two buffers that decouple callers on the hot path from the
//! single-threaded maintenance loop: a lossy per-shard read ring and a
//! lossless global write buffer.
//!
//! Grounded on `storage/map/queue.rs`'s `Queue` (a `Mutex`-guarded circular
//! buffer with `try_push`/`try_pop`), generalized into two variants with
//! different overflow behavior per spec.md §4.4: reads are sampled, so a
//! full ring simply drops the newest record; writes must never be lost, so
//! a full write buffer makes the caller wait for room instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

/// Bounded, lossy ring of fingerprints recording recent `get` hits.
/// Overflow silently drops the record — the policy core's frequency
/// sketch only needs a representative sample, not a complete log.
pub struct ReadRing {
    inner: Mutex<RingInner>,
    capacity: usize,
    drops: AtomicU64,
}

struct RingInner {
    buf: Vec<u64>,
    head: usize,
    len: usize,
}

impl ReadRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingInner { buf: vec![0; capacity], head: 0, len: 0 }),
            capacity,
            drops: AtomicU64::new(0),
        }
    }

    /// Records a read. Drops it silently if the ring is full, after
    /// bumping the drop counter [`Self::take_drops`] reports.
    pub fn record(&self, fp: u64) {
        let mut inner = self.inner.lock();
        if inner.len == self.capacity {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let tail = (inner.head + inner.len) % self.capacity;
        inner.buf[tail] = fp;
        inner.len += 1;
    }

    /// Drains every queued fingerprint, oldest first, leaving the ring
    /// empty. Called by the maintenance loop once per tick.
    pub fn drain(&self) -> Vec<u64> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.len);
        for i in 0..inner.len {
            out.push(inner.buf[(inner.head + i) % self.capacity]);
        }
        inner.head = 0;
        inner.len = 0;
        out
    }

    /// Returns and resets the count of reads dropped for being full since
    /// the last call. Polled by the maintenance loop into [`crate::stats::Stats`].
    pub fn take_drops(&self) -> u64 {
        self.drops.swap(0, Ordering::Relaxed)
    }
}

/// A write-side signal queued for the maintenance loop to apply to the
/// policy core. The shard index has already been mutated by the time this
/// is queued; this buffer only carries the bookkeeping the policy core
/// needs (spec.md §4.4/§9: the loader and shard mutation happen
/// synchronously, the policy reaction happens asynchronously).
///
/// `Admit` carries an optional responder: a fresh key's admission decision
/// (doorkeeper gate, candidate-vs-victim comparison) is only known once the
/// maintenance loop processes the signal, so `Cache::set` awaits it to
/// produce its synchronous-looking `bool` result. `Update`/`Delete` never
/// need one — an already-tracked key's write always succeeds at the shard
/// layer regardless of what the policy core later does with it.
pub enum WriteSignal {
    Admit { fp: u64, cost: i64, ttl_tick: Option<u64>, respond_to: Option<oneshot::Sender<bool>> },
    Update { fp: u64, cost: i64, ttl_tick: Option<u64> },
    Delete { fp: u64 },
    SetDoorkeeper { enabled: bool },
}

/// Bounded, lossless queue of write signals. Unlike `ReadRing`, a full
/// buffer makes the caller block until the maintenance loop drains room —
/// dropping a write signal would leave the policy core permanently
/// unaware of an admitted or deleted key.
pub struct WriteBuffer {
    inner: Mutex<VecDeque<WriteSignal>>,
    not_full: Condvar,
    capacity: usize,
    /// The maintenance loop is a tokio task and cannot block a worker
    /// thread on a `Condvar`, so it selects on this instead to react to a
    /// push before its next tick.
    async_notify: tokio::sync::Notify,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            async_notify: tokio::sync::Notify::new(),
        }
    }

    /// Queues a signal, blocking the caller while the buffer is full.
    pub fn push(&self, signal: WriteSignal) {
        let mut guard = self.inner.lock();
        while guard.len() >= self.capacity {
            self.not_full.wait(&mut guard);
        }
        guard.push_back(signal);
        drop(guard);
        self.async_notify.notify_one();
    }

    /// Resolves once a push has happened since the last call. Used by the
    /// maintenance loop's `tokio::select!` to wake up promptly instead of
    /// waiting for the next tick.
    pub async fn notified(&self) {
        self.async_notify.notified().await;
    }

    /// Drains every queued signal without blocking, waking any producer
    /// waiting on room.
    pub fn drain(&self) -> Vec<WriteSignal> {
        let mut guard = self.inner.lock();
        let out = guard.drain(..).collect();
        self.not_full.notify_all();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_ring_drops_when_full() {
        let ring = ReadRing::new(2);
        ring.record(1);
        ring.record(2);
        ring.record(3); // dropped
        assert_eq!(ring.drain(), vec![1, 2]);
        assert!(ring.drain().is_empty());
    }

    #[test]
    fn write_buffer_roundtrips_in_order() {
        let wb = WriteBuffer::new(4);
        wb.push(WriteSignal::Admit { fp: 1, cost: 1, ttl_tick: None, respond_to: None });
        wb.push(WriteSignal::Delete { fp: 1 });
        let drained = wb.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], WriteSignal::Admit { fp: 1, .. }));
        assert!(matches!(drained[1], WriteSignal::Delete { fp: 1 }));
    }
}
