//! Bloom-style doorkeeper: requires a key be seen twice before its first
//! admission is permitted.
//!
//! Grounded on `db/admission/door_keeper.rs`'s 3-probe packed bitset, sized
//! for a target false-positive rate of about 1% (spec.md §3), simplified
//! from the teacher's atomic CAS-loop bit-sets to plain bits since the
//! doorkeeper is exclusively owned by the single-threaded maintenance loop.

use crate::hasher::{mix64, next_pow2};

/// Packed bit-array doorkeeper, 64 bits per word, 3 probes per key.
pub struct Doorkeeper {
    bits: Vec<u64>,
    mask: u32,
}

impl Doorkeeper {
    /// Sizes the doorkeeper for `capacity` entries at ~1% false-positive
    /// rate (about 10 bits per entry for a 3-hash Bloom filter).
    pub fn new(capacity: usize) -> Self {
        let total_bits = next_pow2((capacity.max(1)) * 10) as u32;
        let word_count = ((total_bits as u64 + 63) / 64) as usize;
        Self {
            bits: vec![0u64; word_count.max(1)],
            mask: total_bits - 1,
        }
    }

    /// Returns true if the fingerprint was already marked seen.
    pub fn probably_seen(&self, fp: u64) -> bool {
        let (i0, i1, i2) = self.indices(fp);
        self.get(i0) && self.get(i1) && self.get(i2)
    }

    /// Returns true if the fingerprint was already seen; otherwise marks it
    /// seen and returns false. This is the "first time" gate for admission.
    pub fn seen_or_add(&mut self, fp: u64) -> bool {
        let (i0, i1, i2) = self.indices(fp);
        if self.get(i0) && self.get(i1) && self.get(i2) {
            return true;
        }
        self.set(i0);
        self.set(i1);
        self.set(i2);
        false
    }

    /// Clears all bits. Run alongside sketch aging (spec.md §4.3).
    pub fn reset(&mut self) {
        for w in &mut self.bits {
            *w = 0;
        }
    }

    fn indices(&self, fp: u64) -> (u32, u32, u32) {
        let mut h = fp;
        let i0 = (h as u32) & self.mask;
        h = mix64(h);
        let i1 = (h as u32) & self.mask;
        h = mix64(h);
        let i2 = (h as u32) & self.mask;
        (i0, i1, i2)
    }

    fn word_bit(i: u32) -> (usize, u64) {
        ((i >> 6) as usize, 1u64 << (i & 63))
    }

    fn get(&self, i: u32) -> bool {
        let (w, b) = Self::word_bit(i);
        (self.bits[w] & b) != 0
    }

    fn set(&mut self, i: u32) {
        let (w, b) = Self::word_bit(i);
        self.bits[w] |= b;
    }
}
