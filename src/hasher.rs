//! Maps keys to 64-bit fingerprints.
//!
//! Grounded on the teacher's choice of `xxhash-rust` (xxh3) over
//! `std::collections::hash_map::RandomState` for a fast, non-cryptographic
//! hash (see `Borislavv-rs-adv-cache`'s `Cargo.toml`, which already carries
//! `xxhash-rust`).

use std::hash::Hash;
use std::sync::Arc;
use xxhash_rust::xxh3::Xxh3Builder;

/// Computes a 64-bit fingerprint for a key.
///
/// Two construction forms, matching spec.md §4.1: direct hashing of the key
/// (`Hasher::new`), or hashing of a caller-supplied projection for composite
/// keys (`Hasher::with_projection`). Fingerprint equality does not imply key
/// equality; the shard map resolves collisions with a full key comparison.
#[derive(Clone)]
pub struct Hasher<K> {
    builder: Xxh3Builder,
    project: Option<Arc<dyn Fn(&K) -> u64 + Send + Sync>>,
}

impl<K: Hash> Hasher<K> {
    /// Direct hashing of the key's `Hash` implementation.
    pub fn new() -> Self {
        Self {
            builder: Xxh3Builder::new(),
            project: None,
        }
    }

    /// Hashes the projection returned by `f` instead of the key itself.
    /// Useful for composite keys where only part of the key should
    /// determine sharding/admission behavior.
    pub fn with_projection<F>(f: F) -> Self
    where
        F: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        Self {
            builder: Xxh3Builder::new(),
            project: Some(Arc::new(f)),
        }
    }

    /// Computes the fingerprint for `key`.
    pub fn fingerprint(&self, key: &K) -> u64 {
        if let Some(project) = &self.project {
            return mix64(project(key));
        }
        use std::hash::{BuildHasher, Hasher as _};
        let mut h = self.builder.build_hasher();
        key.hash(&mut h);
        h.finish()
    }
}

impl<K: Hash> Default for Hasher<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Splitmix64-style bit mixer, grounded on
/// `db/admission/door_keeper.rs`/`storage/lfu/helper.rs`'s `mix64`, reused
/// here to re-spread projection outputs that may not be uniformly
/// distributed (e.g. a caller projecting onto a small integer range).
#[inline]
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}

/// Rounds `n` up to the next power of two, with a floor of 1.
/// Grounded on `storage/lfu/helper.rs::next_pow2`.
#[inline]
pub fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_fingerprint() {
        let h: Hasher<&str> = Hasher::new();
        assert_eq!(h.fingerprint(&"foo"), h.fingerprint(&"foo"));
    }

    #[test]
    fn different_keys_usually_differ() {
        let h: Hasher<&str> = Hasher::new();
        assert_ne!(h.fingerprint(&"foo"), h.fingerprint(&"bar"));
    }

    #[test]
    fn projection_is_used() {
        let h: Hasher<(u64, u64)> = Hasher::with_projection(|k: &(u64, u64)| k.0);
        assert_eq!(h.fingerprint(&(1, 2)), h.fingerprint(&(1, 3)));
        assert_ne!(h.fingerprint(&(1, 2)), h.fingerprint(&(2, 2)));
    }

    #[test]
    fn next_pow2_rounds_up() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(8), 8);
    }
}
