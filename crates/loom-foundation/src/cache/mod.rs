//! Composition cache
//!
//! Materialized adapter stacks keyed by plan fingerprint, shared read-only by
//! every caller holding the same fingerprint.
//!
//! # Contract
//!
//! - At most one build per fingerprint is in flight. Callers arriving during a
//!   build wait for it and receive the same weights.
//! - An entry's reference count equals the number of outstanding
//!   [`CompositionCache::get_or_build`] calls for it, including callers still
//!   waiting on the build. [`CompositionHandle`] releases its count on drop.
//! - Only zero-refcount entries are evicted, least recently released first,
//!   and only when a new build needs the bytes.
//! - Builds run on their own task: a caller that stops waiting never cancels
//!   the build, and a build nobody waits for is still cached.
//!
//! # Locking
//!
//! Map mutations are serialized per bucket. The byte ledger has its own lock,
//! always taken before any bucket lock.

pub mod ledger;
pub mod materializer;
pub mod stats;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, warn};

use loom_kernel::adapter::AdapterRef;
use loom_kernel::composition::{
    CacheError, ComposedWeights, CompositionPlan, CompositionStrategy, ExhaustionReason,
    Fingerprint,
};

pub use ledger::MemoryLedger;
pub use materializer::Materializer;
pub use stats::CacheStats;

use stats::Counters;

use crate::retry::RetryPolicy;

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on resident plus in-flight composition bytes
    pub memory_budget_bytes: u64,
    /// Number of independently locked fingerprint buckets
    pub buckets: usize,
    /// Idle entries older than this are dropped by maintenance. `None` keeps
    /// them until evicted.
    pub idle_ttl_secs: Option<u64>,
    /// Retry policy for transient artifact fetch errors
    pub artifact_retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 8 * 1024 * 1024 * 1024,
            buckets: 16,
            idle_ttl_secs: None,
            artifact_retry: RetryPolicy::default(),
        }
    }
}

type BuildOutcome = Option<Result<Arc<ComposedWeights>, CacheError>>;

struct Entry {
    id: u64,
    weights: Arc<ComposedWeights>,
    refcount: usize,
    /// Release clock value at the last transition to zero
    released_at: u64,
    last_access: Instant,
    built_at: SystemTime,
}

enum Slot {
    Building {
        id: u64,
        waiters: usize,
        adapters: Vec<AdapterRef>,
        done: watch::Receiver<BuildOutcome>,
    },
    Ready(Entry),
}

#[derive(Default)]
struct Bucket {
    slots: HashMap<Fingerprint, Slot>,
    /// Invalidated entries still held by callers, by entry id
    retired: HashMap<u64, Entry>,
}

struct CacheInner {
    buckets: Vec<Mutex<Bucket>>,
    ledger: Mutex<MemoryLedger>,
    materializer: Materializer,
    counters: Counters,
    next_entry_id: AtomicU64,
    release_clock: AtomicU64,
}

/// Provenance of one cached composition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
    pub fingerprint: Fingerprint,
    pub strategy: CompositionStrategy,
    pub adapters: Vec<AdapterRef>,
    pub size_bytes: u64,
    pub refcount: usize,
    pub built_at: SystemTime,
}

/// Shared, budgeted store of composed weights.
#[derive(Clone)]
pub struct CompositionCache {
    inner: Arc<CacheInner>,
}

impl CompositionCache {
    pub fn new(config: &CacheConfig, materializer: Materializer) -> Self {
        let buckets = config.buckets.max(1);
        Self {
            inner: Arc::new(CacheInner {
                buckets: (0..buckets).map(|_| Mutex::new(Bucket::default())).collect(),
                ledger: Mutex::new(MemoryLedger::new(config.memory_budget_bytes)),
                materializer,
                counters: Counters::default(),
                next_entry_id: AtomicU64::new(1),
                release_clock: AtomicU64::new(1),
            }),
        }
    }

    /// Return the composition for `plan`, building it on a miss.
    ///
    /// The returned handle holds one reference until dropped.
    pub async fn get_or_build(&self, plan: &CompositionPlan) -> Result<CompositionHandle, CacheError> {
        let fingerprint = &plan.fingerprint;
        let (id, done) = {
            let mut bucket = self.inner.bucket(fingerprint).lock();
            match bucket.slots.get_mut(fingerprint) {
                Some(Slot::Ready(entry)) => {
                    entry.refcount += 1;
                    entry.last_access = Instant::now();
                    Counters::bump(&self.inner.counters.hits);
                    debug!(fingerprint = fingerprint.short(), refcount = entry.refcount, "cache hit");
                    return Ok(CompositionHandle::new(
                        &self.inner,
                        fingerprint.clone(),
                        entry.id,
                        entry.weights.clone(),
                        true,
                    ));
                }
                Some(Slot::Building { id, waiters, done, .. }) => {
                    *waiters += 1;
                    Counters::bump(&self.inner.counters.misses);
                    debug!(fingerprint = fingerprint.short(), waiters = *waiters, "joining in-flight build");
                    (*id, done.clone())
                }
                None => {
                    let id = self.inner.next_entry_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    bucket.slots.insert(
                        fingerprint.clone(),
                        Slot::Building {
                            id,
                            waiters: 1,
                            adapters: plan.adapter_refs(),
                            done: rx.clone(),
                        },
                    );
                    Counters::bump(&self.inner.counters.misses);
                    Counters::bump(&self.inner.counters.builds);
                    debug!(fingerprint = fingerprint.short(), "cache miss, building");

                    let inner = Arc::clone(&self.inner);
                    let plan = plan.clone();
                    let span = tracing::info_span!(
                        "loom.cache.build",
                        fingerprint = plan.fingerprint.short(),
                        adapters = plan.len(),
                        strategy = %plan.strategy,
                    );
                    tokio::spawn(async move { inner.build(plan, id, tx).await }.instrument(span));
                    (id, rx)
                }
            }
        };

        self.wait(fingerprint.clone(), id, done).await
    }

    /// Drop a handle, releasing its reference.
    pub fn release(&self, handle: CompositionHandle) {
        drop(handle);
    }

    async fn wait(
        &self,
        fingerprint: Fingerprint,
        id: u64,
        mut done: watch::Receiver<BuildOutcome>,
    ) -> Result<CompositionHandle, CacheError> {
        let mut waiter = WaiterGuard {
            inner: Arc::clone(&self.inner),
            fingerprint,
            id,
            armed: true,
        };

        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        waiter.armed = false;

        match outcome {
            Some(Ok(weights)) => Ok(CompositionHandle::new(
                &self.inner,
                waiter.fingerprint.clone(),
                id,
                weights,
                false,
            )),
            Some(Err(err)) => Err(err),
            None => Err(CacheError::BuildAborted {
                fingerprint: waiter.fingerprint.clone(),
            }),
        }
    }

    /// Invalidate every entry built from one of `adapters`.
    ///
    /// Unheld entries are dropped. Held entries stay valid for their holders
    /// but are no longer handed out; they are freed on their last release.
    /// Returns the number of entries invalidated.
    pub fn invalidate_adapters(&self, adapters: &[AdapterRef]) -> usize {
        if adapters.is_empty() {
            return 0;
        }
        let doomed: HashSet<&AdapterRef> = adapters.iter().collect();
        let mut invalidated = 0;

        let mut ledger = self.inner.ledger.lock();
        for bucket in &self.inner.buckets {
            let mut bucket = bucket.lock();
            let matching: Vec<Fingerprint> = bucket
                .slots
                .iter()
                .filter_map(|(fingerprint, slot)| match slot {
                    Slot::Ready(entry)
                        if entry.weights.layers.iter().any(|l| doomed.contains(&l.adapter)) =>
                    {
                        Some(fingerprint.clone())
                    }
                    _ => None,
                })
                .collect();

            for fingerprint in matching {
                if let Some(Slot::Ready(entry)) = bucket.slots.remove(&fingerprint) {
                    invalidated += 1;
                    if entry.refcount == 0 {
                        ledger.free(entry.weights.size_bytes);
                    } else {
                        bucket.retired.insert(entry.id, entry);
                    }
                }
            }
        }
        drop(ledger);

        if invalidated > 0 {
            info!(invalidated, "cache entries invalidated");
        }
        invalidated
    }

    /// Drop unheld entries idle for at least `max_idle`. `Duration::ZERO`
    /// drops every unheld entry.
    pub fn trim_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut trimmed = 0;

        let mut ledger = self.inner.ledger.lock();
        for bucket in &self.inner.buckets {
            let mut bucket = bucket.lock();
            bucket.slots.retain(|_, slot| match slot {
                Slot::Ready(entry)
                    if entry.refcount == 0
                        && now.saturating_duration_since(entry.last_access) >= max_idle =>
                {
                    ledger.free(entry.weights.size_bytes);
                    trimmed += 1;
                    false
                }
                _ => true,
            });
        }
        drop(ledger);

        if trimmed > 0 {
            debug!(trimmed, "idle cache entries trimmed");
        }
        trimmed
    }

    /// Records that cache entries still depend on: held entries, retired
    /// entries and in-flight builds.
    pub fn pinned_adapters(&self) -> HashSet<AdapterRef> {
        let mut pinned = HashSet::new();
        for bucket in &self.inner.buckets {
            let bucket = bucket.lock();
            for slot in bucket.slots.values() {
                match slot {
                    Slot::Ready(entry) if entry.refcount > 0 => {
                        pinned.extend(entry.weights.adapter_refs());
                    }
                    Slot::Building { adapters, .. } => pinned.extend(adapters.iter().cloned()),
                    Slot::Ready(_) => {}
                }
            }
            for entry in bucket.retired.values() {
                pinned.extend(entry.weights.adapter_refs());
            }
        }
        pinned
    }

    /// Current reference count of the live entry for `fingerprint`.
    pub fn refcount(&self, fingerprint: &Fingerprint) -> Option<usize> {
        match self.inner.bucket(fingerprint).lock().slots.get(fingerprint) {
            Some(Slot::Ready(entry)) => Some(entry.refcount),
            Some(Slot::Building { waiters, .. }) => Some(*waiters),
            None => None,
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        matches!(
            self.inner.bucket(fingerprint).lock().slots.get(fingerprint),
            Some(Slot::Ready(_))
        )
    }

    /// Provenance of every resident entry, ordered by fingerprint.
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let mut entries: Vec<CacheEntryInfo> = self
            .inner
            .buckets
            .iter()
            .flat_map(|bucket| {
                let bucket = bucket.lock();
                bucket
                    .slots
                    .iter()
                    .filter_map(|(fingerprint, slot)| match slot {
                        Slot::Ready(entry) => Some(CacheEntryInfo {
                            fingerprint: fingerprint.clone(),
                            strategy: entry.weights.strategy,
                            adapters: entry.weights.adapter_refs(),
                            size_bytes: entry.weights.size_bytes,
                            refcount: entry.refcount,
                            built_at: entry.built_at,
                        }),
                        Slot::Building { .. } => None,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let ledger = *self.inner.ledger.lock();
        let entries = self
            .inner
            .buckets
            .iter()
            .map(|b| {
                b.lock()
                    .slots
                    .values()
                    .filter(|s| matches!(s, Slot::Ready(_)))
                    .count()
            })
            .sum();
        let counters = &self.inner.counters;
        CacheStats {
            hits: Counters::load(&counters.hits),
            misses: Counters::load(&counters.misses),
            builds: Counters::load(&counters.builds),
            build_failures: Counters::load(&counters.build_failures),
            evictions: Counters::load(&counters.evictions),
            entries,
            resident_bytes: ledger.resident(),
            reserved_bytes: ledger.reserved(),
            budget_bytes: ledger.budget(),
        }
    }
}

impl CacheInner {
    fn bucket(&self, fingerprint: &Fingerprint) -> &Mutex<Bucket> {
        &self.buckets[fingerprint.bucket(self.buckets.len())]
    }

    /// Body of the spawned build task.
    async fn build(self: Arc<Self>, plan: CompositionPlan, id: u64, done: watch::Sender<BuildOutcome>) {
        let started = Instant::now();
        let result = self.reserve_and_materialize(&plan).await;

        let outcome = match result {
            Ok((weights, reserved)) => {
                let weights = Arc::new(weights);
                self.commit(&plan.fingerprint, id, Arc::clone(&weights), reserved);
                info!(
                    fingerprint = plan.fingerprint.short(),
                    bytes = weights.size_bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "composition built"
                );
                Ok(weights)
            }
            Err(err) => {
                self.bucket(&plan.fingerprint).lock().slots.remove(&plan.fingerprint);
                Counters::bump(&self.counters.build_failures);
                warn!(fingerprint = plan.fingerprint.short(), error = %err, "composition build failed");
                Err(err)
            }
        };
        done.send_replace(Some(outcome));
    }

    async fn reserve_and_materialize(
        &self,
        plan: &CompositionPlan,
    ) -> Result<(ComposedWeights, u64), CacheError> {
        let mut reserved = plan.estimated_bytes;
        self.reserve(reserved)?;

        let materialized = std::panic::AssertUnwindSafe(self.materializer.materialize(plan))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(CacheError::BuildAborted {
                    fingerprint: plan.fingerprint.clone(),
                })
            });
        let weights = match materialized {
            Ok(weights) => weights,
            Err(err) => {
                self.ledger.lock().unreserve(reserved);
                return Err(err);
            }
        };

        if weights.size_bytes > reserved {
            let extra = weights.size_bytes - reserved;
            if let Err(err) = self.reserve(extra) {
                self.ledger.lock().unreserve(reserved);
                return Err(err);
            }
            reserved += extra;
        }
        Ok((weights, reserved))
    }

    /// Reserve `bytes`, evicting idle entries as needed.
    fn reserve(&self, bytes: u64) -> Result<(), CacheError> {
        let mut ledger = self.ledger.lock();
        if bytes > ledger.budget() {
            return Err(exhausted(bytes, &ledger));
        }
        while !ledger.try_reserve(bytes) {
            let Some(freed) = self.evict_one() else {
                return Err(exhausted(bytes, &ledger));
            };
            ledger.free(freed);
        }
        Ok(())
    }

    /// Remove the least recently released unheld entry. Caller holds the ledger lock.
    fn evict_one(&self) -> Option<u64> {
        let mut victim: Option<(usize, Fingerprint, u64)> = None;
        for (index, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.lock();
            for (fingerprint, slot) in &bucket.slots {
                if let Slot::Ready(entry) = slot {
                    let older = victim.as_ref().is_none_or(|(_, _, at)| entry.released_at < *at);
                    if entry.refcount == 0 && older {
                        victim = Some((index, fingerprint.clone(), entry.released_at));
                    }
                }
            }
        }

        let (index, fingerprint, _) = victim?;
        let mut bucket = self.buckets[index].lock();
        match bucket.slots.get(&fingerprint) {
            Some(Slot::Ready(entry)) if entry.refcount == 0 => {}
            // Re-acquired since the scan; the caller retries.
            _ => return Some(0),
        }
        let Some(Slot::Ready(entry)) = bucket.slots.remove(&fingerprint) else {
            return Some(0);
        };
        Counters::bump(&self.counters.evictions);
        debug!(fingerprint = fingerprint.short(), bytes = entry.weights.size_bytes, "cache entry evicted");
        Some(entry.weights.size_bytes)
    }

    /// Publish a finished build: move its bytes to resident and replace the
    /// building slot with a ready entry owned by every waiter.
    fn commit(&self, fingerprint: &Fingerprint, id: u64, weights: Arc<ComposedWeights>, reserved: u64) {
        let mut ledger = self.ledger.lock();
        ledger.commit(reserved, weights.size_bytes);

        let mut bucket = self.bucket(fingerprint).lock();
        let waiters = match bucket.slots.get(fingerprint) {
            Some(Slot::Building { id: building, waiters, .. }) if *building == id => *waiters,
            _ => 0,
        };
        let now = Instant::now();
        let released_at = if waiters == 0 {
            self.release_clock.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        bucket.slots.insert(
            fingerprint.clone(),
            Slot::Ready(Entry {
                id,
                weights,
                refcount: waiters,
                released_at,
                last_access: now,
                built_at: SystemTime::now(),
            }),
        );
    }

    /// Give back one reference to entry `id`.
    fn release(&self, fingerprint: &Fingerprint, id: u64) {
        let freed = {
            let mut bucket = self.bucket(fingerprint).lock();
            let live = match bucket.slots.get_mut(fingerprint) {
                Some(Slot::Ready(entry)) if entry.id == id => {
                    debug_assert!(entry.refcount > 0, "release without matching acquire");
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 {
                        entry.released_at = self.release_clock.fetch_add(1, Ordering::Relaxed);
                        entry.last_access = Instant::now();
                    }
                    true
                }
                _ => false,
            };
            if live { None } else { release_retired(&mut bucket, id) }
        };
        if let Some(bytes) = freed {
            self.ledger.lock().free(bytes);
        }
    }

    /// A waiter gave up before its handle was created.
    fn abandon_wait(&self, fingerprint: &Fingerprint, id: u64) {
        {
            let mut bucket = self.bucket(fingerprint).lock();
            if let Some(Slot::Building { id: building, waiters, .. }) = bucket.slots.get_mut(fingerprint) {
                if *building == id {
                    *waiters = waiters.saturating_sub(1);
                    return;
                }
            }
        }
        // The build finished and counted this waiter; give the reference back.
        self.release(fingerprint, id);
    }
}

fn release_retired(bucket: &mut Bucket, id: u64) -> Option<u64> {
    let entry = bucket.retired.get_mut(&id)?;
    entry.refcount = entry.refcount.saturating_sub(1);
    if entry.refcount > 0 {
        return None;
    }
    bucket.retired.remove(&id).map(|e| e.weights.size_bytes)
}

fn exhausted(required_bytes: u64, ledger: &MemoryLedger) -> CacheError {
    CacheError::ResourceExhausted {
        reason: ExhaustionReason::MemoryBudget {
            required_bytes,
            budget_bytes: ledger.budget(),
            available_bytes: ledger.available(),
        },
    }
}

/// Releases a counted waiter if its wait is dropped before completion.
struct WaiterGuard {
    inner: Arc<CacheInner>,
    fingerprint: Fingerprint,
    id: u64,
    armed: bool,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon_wait(&self.fingerprint, self.id);
        }
    }
}

/// A held reference to cached composed weights.
///
/// Dropping the handle releases the reference.
pub struct CompositionHandle {
    inner: Arc<CacheInner>,
    fingerprint: Fingerprint,
    id: u64,
    weights: Arc<ComposedWeights>,
    cache_hit: bool,
}

impl CompositionHandle {
    fn new(
        inner: &Arc<CacheInner>,
        fingerprint: Fingerprint,
        id: u64,
        weights: Arc<ComposedWeights>,
        cache_hit: bool,
    ) -> Self {
        Self {
            inner: Arc::clone(inner),
            fingerprint,
            id,
            weights,
            cache_hit,
        }
    }

    pub fn weights(&self) -> &ComposedWeights {
        &self.weights
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Whether the composition was already resident when requested.
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }
}

impl std::fmt::Debug for CompositionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionHandle")
            .field("fingerprint", &self.fingerprint.short())
            .field("cache_hit", &self.cache_hit)
            .finish()
    }
}

impl Drop for CompositionHandle {
    fn drop(&mut self) {
        self.inner.release(&self.fingerprint, self.id);
    }
}
