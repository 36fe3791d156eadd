//! Versioned adapter registry
//!
//! The registry is an append-mostly catalog of [`AdapterRecord`]s. Readers
//! take an `Arc` of the current [`RegistrySnapshot`] and never block on
//! writers beyond the pointer swap; writers are serialized and publish a new
//! snapshot per mutation.

pub mod catalog;
pub mod snapshot;
pub mod trust;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use loom_kernel::adapter::{AdapterRecord, AdapterRef, RegistryError, VersionSelector};

pub use catalog::{AdapterCatalog, CatalogReport};
pub use snapshot::{RegistryEntry, RegistrySnapshot, RegistryStats};
pub use trust::{Ed25519Verifier, TrustPolicy, sign_record};

/// Outcome of a successful [`AdapterRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new version was added
    Registered(AdapterRef),
    /// The same content was already registered under this `(id, version)`
    Unchanged(AdapterRef),
}

impl Registration {
    pub fn adapter(&self) -> &AdapterRef {
        match self {
            Self::Registered(r) | Self::Unchanged(r) => r,
        }
    }
}

/// Process-wide adapter catalog.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
    trust: TrustPolicy,
}

impl AdapterRegistry {
    pub fn new(trust: TrustPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            writer: Mutex::new(()),
            trust,
        }
    }

    /// The current catalog view.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation()
    }

    /// Register a new adapter version.
    ///
    /// Re-registering identical content under an existing `(id, version)` is
    /// a no-op; different content is a [`RegistryError::Conflict`]. Versions
    /// of one id must strictly increase.
    pub fn register(&self, record: AdapterRecord) -> Result<Registration, RegistryError> {
        record.validate()?;
        self.trust.check(&record)?;

        let digest = record.content_digest();
        let adapter = record.adapter_ref();

        self.mutate(|snapshot| {
            if let Some(existing) = snapshot.entry(&adapter.id, adapter.version) {
                return if existing.digest == digest {
                    debug!(adapter = %adapter, "identical record already registered");
                    Ok((Registration::Unchanged(adapter.clone()), false))
                } else {
                    Err(RegistryError::Conflict {
                        id: adapter.id.clone(),
                        version: adapter.version,
                        existing_digest: existing.digest.clone(),
                        incoming_digest: digest.clone(),
                    })
                };
            }
            if let Some(latest) = snapshot.latest_version(&adapter.id) {
                if adapter.version <= latest {
                    return Err(RegistryError::NonMonotonicVersion {
                        id: adapter.id.clone(),
                        version: adapter.version,
                        latest,
                    });
                }
            }
            snapshot.insert(Arc::new(record), digest.clone());
            Ok((Registration::Registered(adapter.clone()), true))
        })
        .inspect(|outcome| {
            if let Registration::Registered(adapter) = outcome {
                info!(adapter = %adapter, generation = self.generation(), "adapter registered");
            }
        })
        .inspect_err(|e| warn!(adapter = %adapter, error = %e, "adapter registration rejected"))
    }

    /// Look up a record. See [`RegistrySnapshot::lookup`].
    pub fn lookup(
        &self,
        id: &str,
        selector: VersionSelector,
    ) -> Result<Arc<AdapterRecord>, RegistryError> {
        self.snapshot().lookup(id, selector).cloned()
    }

    /// Mark a version inactive. Returns whether the flag changed.
    ///
    /// Compositions already built from the record stay usable until evicted;
    /// new plans no longer select it.
    pub fn deactivate(&self, id: &str, version: u64) -> Result<bool, RegistryError> {
        let changed = self.mutate(|snapshot| {
            let changed = snapshot.set_active(id, version, false)?;
            Ok((changed, changed))
        })?;
        if changed {
            info!(adapter = %AdapterRef::new(id, version), "adapter deactivated");
        }
        Ok(changed)
    }

    /// Undo a deactivation. Returns whether the flag changed.
    pub fn reactivate(&self, id: &str, version: u64) -> Result<bool, RegistryError> {
        let changed = self.mutate(|snapshot| {
            let changed = snapshot.set_active(id, version, true)?;
            Ok((changed, changed))
        })?;
        if changed {
            info!(adapter = %AdapterRef::new(id, version), "adapter reactivated");
        }
        Ok(changed)
    }

    /// Remove inactive records that no held composition references.
    ///
    /// Returns the removed records so dependent caches can invalidate entries
    /// built from them.
    pub fn collect_garbage(&self, pinned: &HashSet<AdapterRef>) -> Vec<AdapterRef> {
        let removed = self
            .mutate::<_, std::convert::Infallible>(|snapshot| {
                let doomed: Vec<AdapterRef> = snapshot
                    .entries()
                    .into_iter()
                    .filter(|e| !e.active)
                    .map(|e| e.record.adapter_ref())
                    .filter(|r| !pinned.contains(r))
                    .collect();
                for adapter in &doomed {
                    snapshot.remove_inactive(adapter);
                }
                let changed = !doomed.is_empty();
                Ok((doomed, changed))
            })
            .unwrap_or_default();
        if !removed.is_empty() {
            info!(count = removed.len(), generation = self.generation(), "inactive adapters collected");
        }
        removed
    }

    pub fn stats(&self) -> RegistryStats {
        self.snapshot().stats()
    }

    /// Apply `f` to a private copy of the current snapshot and publish it if
    /// `f` reports a change.
    fn mutate<T, E>(
        &self,
        f: impl FnOnce(&mut RegistrySnapshot) -> Result<(T, bool), E>,
    ) -> Result<T, E> {
        let _writer = self.writer.lock();
        let mut next = RegistrySnapshot::clone(&self.snapshot());
        let (value, changed) = f(&mut next)?;
        if changed {
            *self.current.write() = Arc::new(next);
        }
        Ok(value)
    }
}
