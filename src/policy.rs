//! Window-TinyLFU policy core: the Window/Probation/Protected segments,
//! their capacities, and the admit/hit/update/delete signal processing
//! that drives them.
//!
//! Grounded on `storage/lfu/tiny_lfu.rs`'s `ShardedAdmitter` (candidate vs.
//! victim comparison via the frequency sketch, gated by the doorkeeper) and
//! `db/storage/lru.rs`'s segment bookkeeping, but de-sharded: spec.md §5
//! gives the maintenance loop sole ownership of all policy state, so there
//! is exactly one sketch, one doorkeeper, and one set of segments, not one
//! per shard.
//!
//! The policy core never touches key/value data; it only ever sees
//! fingerprints and costs. Key/value storage lives in the shard index
//! (`shard.rs`), cross-referenced by fingerprint.

use std::collections::HashMap;

use crate::arena::{new_list, Arena, ListHead, Segment};
use crate::doorkeeper::Doorkeeper;
use crate::sketch::FrequencySketch;
use crate::wheel::Wheel;

/// Fraction of total capacity given to the Window segment.
const WINDOW_FRACTION: f64 = 0.01;
/// Fraction of the main segment (capacity minus window) given to Protected.
const PROTECTED_FRACTION: f64 = 0.8;

/// Outcome of feeding a signal to the policy core: whether the triggering
/// entry ended up admitted/promoted, and which fingerprints (if any) were
/// evicted as a side effect and must be removed from the shard index too.
#[derive(Debug, Default)]
pub struct PolicyOutcome {
    pub admitted: bool,
    pub evicted: Vec<u64>,
}

impl PolicyOutcome {
    fn rejected() -> Self {
        Self { admitted: false, evicted: Vec::new() }
    }
}

/// Owns the frequency sketch, doorkeeper, and the three LRU segments.
pub struct Policy {
    capacity: i64,
    window_cap: i64,
    protected_cap: i64,

    window: ListHead,
    probation: ListHead,
    protected: ListHead,

    window_cost: i64,
    probation_cost: i64,
    protected_cost: i64,

    arena: Arena,
    index: HashMap<u64, u32>,

    sketch: FrequencySketch,
    doorkeeper: Doorkeeper,
    doorkeeper_enabled: bool,
    wheel: Wheel,
}

impl Policy {
    /// Builds a policy core sized for a total cost budget of `capacity`.
    pub fn new(capacity: i64) -> Self {
        let cap_f = (capacity.max(1)) as f64;
        let window_cap = ((cap_f * WINDOW_FRACTION).round() as i64).max(1);
        let main_cap = (capacity - window_cap).max(0);
        let protected_cap = (main_cap as f64 * PROTECTED_FRACTION).round() as i64;

        Self {
            capacity,
            window_cap,
            protected_cap,
            window: new_list(),
            probation: new_list(),
            protected: new_list(),
            window_cost: 0,
            probation_cost: 0,
            protected_cost: 0,
            arena: Arena::with_capacity(capacity.max(0) as usize / 4 + 16),
            index: HashMap::new(),
            sketch: FrequencySketch::new(capacity.max(1) as usize),
            doorkeeper: Doorkeeper::new(capacity.max(1) as usize),
            // Optional per spec.md §4.3: gating only applies once a caller
            // opts in via `Cache::set_doorkeeper`.
            doorkeeper_enabled: false,
            wheel: Wheel::new(),
        }
    }

    /// Enables or disables the doorkeeper gate. Disabling it clears any
    /// state it was holding; every first sighting is then admitted
    /// straight into the window, same as a second sighting would be
    /// (spec.md §4.3: "disabled, all admissions proceed through normal
    /// TinyLFU gating").
    pub fn set_doorkeeper_enabled(&mut self, enabled: bool) {
        self.doorkeeper_enabled = enabled;
        if !enabled {
            self.doorkeeper.reset();
        }
    }

    pub fn total_cost(&self) -> i64 {
        self.window_cost + self.probation_cost + self.protected_cost
    }

    pub fn contains(&self, fp: u64) -> bool {
        self.index.contains_key(&fp)
    }

    fn record(&mut self, fp: u64) {
        self.sketch.increment(fp);
    }

    fn admission_wins(&self, candidate_fp: u64, victim_fp: u64) -> bool {
        let c = self.sketch.estimate(candidate_fp);
        let v = self.sketch.estimate(victim_fp);
        match c.cmp(&v) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate_fp & 1 == 0,
        }
    }

    /// A brand-new key, not currently tracked. Runs it through the
    /// doorkeeper gate, then the window, demoting and evicting as needed.
    pub fn admit(&mut self, fp: u64, cost: i64) -> PolicyOutcome {
        self.record(fp);

        if self.doorkeeper_enabled && !self.doorkeeper.seen_or_add(fp) {
            // First sighting: the doorkeeper requires a second before the
            // key is allowed to occupy cache space at all.
            return PolicyOutcome::rejected();
        }

        let idx = self.arena.alloc(fp, cost);
        self.arena.get_mut(idx).segment = Segment::Window;
        self.arena.push_front(&mut self.window, idx);
        self.index.insert(fp, idx);
        self.window_cost += cost;

        let mut evicted = Vec::new();
        self.drain_window(&mut evicted);
        self.enforce_capacity(&mut evicted);

        PolicyOutcome { admitted: self.index.contains_key(&fp), evicted }
    }

    /// Moves window overflow into probation.
    fn drain_window(&mut self, evicted: &mut Vec<u64>) {
        while self.window_cost > self.window_cap {
            let Some(idx) = self.arena.pop_tail(&mut self.window) else { break };
            let (fp, cost) = {
                let n = self.arena.get(idx);
                (n.fp, n.cost)
            };
            self.window_cost -= cost;

            if self.probation.is_empty() && self.total_cost() <= self.capacity {
                self.arena.get_mut(idx).segment = Segment::Probation;
                self.arena.push_front(&mut self.probation, idx);
                self.probation_cost += cost;
                continue;
            }

            match self.probation.peek_tail() {
                Some(victim_idx) => {
                    let victim_fp = self.arena.get(victim_idx).fp;
                    if self.total_cost() + cost <= self.capacity
                        || self.admission_wins(fp, victim_fp)
                    {
                        self.arena.get_mut(idx).segment = Segment::Probation;
                        self.arena.push_front(&mut self.probation, idx);
                        self.probation_cost += cost;
                    } else {
                        // Candidate loses to the incumbent victim: it never
                        // enters the main segment.
                        self.arena.get_mut(idx).segment = Segment::Removed;
                        self.wheel.deschedule(&mut self.arena, idx);
                        self.arena.free(idx);
                        self.index.remove(&fp);
                        evicted.push(fp);
                    }
                }
                None => {
                    self.arena.get_mut(idx).segment = Segment::Probation;
                    self.arena.push_front(&mut self.probation, idx);
                    self.probation_cost += cost;
                }
            }
        }
    }

    /// Evicts from the probation tail until total cost is back within
    /// budget. Used after cost updates that may have pushed the cache over
    /// capacity without a fresh admission event to compare against.
    fn enforce_capacity(&mut self, evicted: &mut Vec<u64>) {
        let mut guard = self.index.len() + 1;
        while self.total_cost() > self.capacity && guard > 0 {
            guard -= 1;
            let idx = match self.arena.pop_tail(&mut self.probation) {
                Some(idx) => idx,
                None => match self.arena.pop_tail(&mut self.protected) {
                    Some(idx) => idx,
                    None => match self.arena.pop_tail(&mut self.window) {
                        Some(idx) => idx,
                        None => break,
                    },
                },
            };
            let (fp, cost, seg) = {
                let n = self.arena.get(idx);
                (n.fp, n.cost, n.segment)
            };
            match seg {
                Segment::Window => self.window_cost -= cost,
                Segment::Probation => self.probation_cost -= cost,
                Segment::Protected => self.protected_cost -= cost,
                Segment::Removed => {}
            }
            self.arena.get_mut(idx).segment = Segment::Removed;
            self.wheel.deschedule(&mut self.arena, idx);
            self.arena.free(idx);
            self.index.remove(&fp);
            evicted.push(fp);
        }
    }

    /// An access to a key already tracked by the policy: refreshes
    /// frequency and recency, promoting Probation entries to Protected.
    pub fn hit(&mut self, fp: u64) {
        self.record(fp);
        let Some(&idx) = self.index.get(&fp) else { return };
        let segment = self.arena.get(idx).segment;

        match segment {
            Segment::Window => self.arena.move_to_front(&mut self.window, idx),
            Segment::Protected => self.arena.move_to_front(&mut self.protected, idx),
            Segment::Probation => {
                let cost = self.arena.get(idx).cost;
                self.arena.unlink(&mut self.probation, idx);
                self.probation_cost -= cost;
                self.arena.get_mut(idx).segment = Segment::Protected;
                self.arena.push_front(&mut self.protected, idx);
                self.protected_cost += cost;

                // Protected overflow demotes its own tail back to probation,
                // at the front (it is still more recent than anything
                // already waiting there).
                while self.protected_cost > self.protected_cap {
                    let Some(demoted) = self.arena.pop_tail(&mut self.protected) else { break };
                    let dcost = self.arena.get(demoted).cost;
                    self.protected_cost -= dcost;
                    self.arena.get_mut(demoted).segment = Segment::Probation;
                    self.arena.push_front(&mut self.probation, demoted);
                    self.probation_cost += dcost;
                }
            }
            Segment::Removed => {}
        }
    }

    /// The cost of an already-tracked key changed. Applies the delta and,
    /// if the cache is now over budget, evicts from the weakest segment
    /// tails (no candidate comparison: this isn't a fresh admission).
    pub fn update(&mut self, fp: u64, new_cost: i64) -> Vec<u64> {
        let Some(&idx) = self.index.get(&fp) else { return Vec::new() };
        let segment = self.arena.get(idx).segment;
        let old_cost = self.arena.get(idx).cost;
        self.arena.get_mut(idx).cost = new_cost;

        match segment {
            Segment::Window => self.window_cost += new_cost - old_cost,
            Segment::Probation => self.probation_cost += new_cost - old_cost,
            Segment::Protected => self.protected_cost += new_cost - old_cost,
            Segment::Removed => {}
        }

        let mut evicted = Vec::new();
        self.enforce_capacity(&mut evicted);
        evicted
    }

    /// Removes a tracked key entirely, wherever it currently lives.
    pub fn delete(&mut self, fp: u64) -> bool {
        let Some(idx) = self.index.remove(&fp) else { return false };
        let (cost, segment) = {
            let n = self.arena.get(idx);
            (n.cost, n.segment)
        };
        self.wheel.deschedule(&mut self.arena, idx);
        match segment {
            Segment::Window => {
                self.arena.unlink(&mut self.window, idx);
                self.window_cost -= cost;
            }
            Segment::Probation => {
                self.arena.unlink(&mut self.probation, idx);
                self.probation_cost -= cost;
            }
            Segment::Protected => {
                self.arena.unlink(&mut self.protected, idx);
                self.protected_cost -= cost;
            }
            Segment::Removed => {}
        }
        self.arena.get_mut(idx).segment = Segment::Removed;
        self.arena.free(idx);
        true
    }

    /// Periodic aging: halves the sketch and clears the doorkeeper, so
    /// stale frequency information decays over time (spec.md §4.3).
    pub fn age(&mut self) {
        self.sketch.reset();
        self.doorkeeper.reset();
    }

    pub fn node_index(&self, fp: u64) -> Option<u32> {
        self.index.get(&fp).copied()
    }

    pub fn current_tick(&self) -> u64 {
        self.wheel.current_tick()
    }

    /// Schedules `fp` (already tracked) to expire at `deadline_tick`.
    /// Returns `false` if the deadline has already passed, in which case
    /// the caller should delete the entry immediately instead.
    pub fn schedule_ttl(&mut self, fp: u64, deadline_tick: u64) -> bool {
        let Some(&idx) = self.index.get(&fp) else { return false };
        self.wheel.schedule(&mut self.arena, idx, deadline_tick)
    }

    /// Cancels any pending TTL for `fp`. No-op if it had none.
    pub fn deschedule_ttl(&mut self, fp: u64) {
        if let Some(&idx) = self.index.get(&fp) {
            self.wheel.deschedule(&mut self.arena, idx);
        }
    }

    /// Advances the timing wheel by one tick and fully removes every
    /// entry whose TTL is now due, returning their fingerprints.
    pub fn advance(&mut self) -> Vec<u64> {
        let due = self.wheel.advance(&mut self.arena);
        let mut expired = Vec::with_capacity(due.len());
        for idx in due {
            let fp = self.arena.get(idx).fp;
            self.delete(fp);
            expired.push(fp);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_rejected_by_doorkeeper_when_enabled() {
        let mut p = Policy::new(100);
        p.set_doorkeeper_enabled(true);
        let r = p.admit(1, 1);
        assert!(!r.admitted);
        assert!(!p.contains(1));
    }

    #[test]
    fn second_sighting_is_admitted_when_doorkeeper_enabled() {
        let mut p = Policy::new(100);
        p.set_doorkeeper_enabled(true);
        p.admit(1, 1);
        let r = p.admit(1, 1);
        assert!(r.admitted);
        assert!(p.contains(1));
    }

    #[test]
    fn first_sighting_is_admitted_by_default() {
        let mut p = Policy::new(100);
        let r = p.admit(1, 1);
        assert!(r.admitted);
        assert!(p.contains(1));
    }

    #[test]
    fn hit_promotes_probation_to_protected() {
        let mut p = Policy::new(100);
        p.admit(1, 1);
        p.admit(1, 1);
        // Force the window to overflow so the entry demotes into probation.
        for i in 2..20u64 {
            p.admit(i, 1);
            p.admit(i, 1);
        }
        p.hit(1);
        let idx = p.node_index(1);
        if let Some(idx) = idx {
            assert_eq!(p.arena.get(idx).segment, Segment::Protected);
        }
    }

    #[test]
    fn delete_removes_tracked_key() {
        let mut p = Policy::new(100);
        p.admit(1, 1);
        p.admit(1, 1);
        assert!(p.contains(1));
        assert!(p.delete(1));
        assert!(!p.contains(1));
        assert!(!p.delete(1));
    }

    #[test]
    fn disabled_doorkeeper_admits_first_sighting() {
        let mut p = Policy::new(100);
        p.set_doorkeeper_enabled(false);
        let r = p.admit(1, 1);
        assert!(r.admitted);
        assert!(p.contains(1));
    }

    #[test]
    fn total_cost_never_exceeds_capacity() {
        let mut p = Policy::new(20);
        for i in 0..200u64 {
            p.admit(i, 1);
            p.admit(i, 1);
            assert!(p.total_cost() <= 20);
        }
    }
}
