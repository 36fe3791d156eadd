//! Cache instrumentation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls served by an already resident composition
    pub hits: u64,
    /// Calls that started or joined a build
    pub misses: u64,
    /// Builds started
    pub builds: u64,
    pub build_failures: u64,
    pub evictions: u64,
    /// Entries currently addressable by fingerprint
    pub entries: usize,
    pub resident_bytes: u64,
    pub reserved_bytes: u64,
    pub budget_bytes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub builds: AtomicU64,
    pub build_failures: AtomicU64,
    pub evictions: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
