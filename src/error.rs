//! Error types for cache construction and snapshot I/O.

use thiserror::Error;

/// Errors that can occur when building or restoring a cache.
///
/// Per-operation admission/eviction never produces an error: `get`/`set`/
/// `delete` are infallible at the API boundary (admission failures surface
/// as `false`, not `Err`).
#[derive(Debug, Error)]
pub enum CacheError {
    /// Capacity supplied to the builder was not strictly positive.
    #[error("size must be positive")]
    InvalidConfig,

    /// Snapshot header's user version did not match the version requested
    /// at load time.
    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        expected: u32,
        found: u32,
    },

    /// Snapshot body failed its CRC64 trailer check, or the frame was
    /// malformed in a way that cannot be distinguished from corruption.
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    /// Underlying I/O failure while reading or writing a snapshot.
    #[error("snapshot i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by [`crate::loader::Loader`] fetches.
///
/// Distinct from [`CacheError`]: the loader is a thin singleflight wrapper
/// around the cache and never touches policy state, so its errors never
/// cross into the cache's own error type (per the design note that the
/// loader is orthogonal to the policy core).
#[derive(Debug, Error)]
pub enum LoaderError<E> {
    /// The caller-supplied fetch future failed.
    #[error("fetch failed: {0}")]
    Fetch(E),

    /// The in-flight fetch this caller was waiting on was dropped without
    /// completing (e.g. the leader task panicked).
    #[error("in-flight fetch was abandoned")]
    Abandoned,
}
