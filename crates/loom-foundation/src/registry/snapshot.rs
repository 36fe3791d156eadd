//! Immutable registry views.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use loom_kernel::adapter::{AdapterKind, AdapterRecord, AdapterRef, RegistryError, VersionSelector};

/// One registered version of an adapter.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub record: Arc<AdapterRecord>,
    pub active: bool,
    /// Content digest computed at registration
    pub digest: String,
    /// Registration order, used to break version ties in listings
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexKey {
    version: u64,
    seq: u64,
    id: String,
}

/// A consistent view of the catalog at one generation.
///
/// Snapshots are never mutated once published. Writers clone the current
/// snapshot, apply their change and swap the new one in, so a reader holding
/// a snapshot sees a fixed catalog for as long as it keeps it.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    next_seq: u64,
    records: HashMap<String, BTreeMap<u64, RegistryEntry>>,
    /// Highest version ever registered per id, surviving garbage collection
    high_water: HashMap<String, u64>,
    /// Per kind, version descending then registration order
    by_kind: HashMap<AdapterKind, Vec<IndexKey>>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entry(&self, id: &str, version: u64) -> Option<&RegistryEntry> {
        self.records.get(id)?.get(&version)
    }

    /// Resolve a record by id and selector.
    ///
    /// `Exact` returns the version whether active or not, so provenance of an
    /// already-served composition can always be looked up.
    pub fn lookup(
        &self,
        id: &str,
        selector: VersionSelector,
    ) -> Result<&Arc<AdapterRecord>, RegistryError> {
        let found = self.records.get(id).and_then(|versions| match selector {
            VersionSelector::LatestActive => versions.values().rev().find(|e| e.active),
            VersionSelector::Exact(version) => versions.get(&version),
        });
        found.map(|e| &e.record).ok_or_else(|| RegistryError::NotFound {
            id: id.to_string(),
            selector,
        })
    }

    /// Highest active version of `id` compatible with `base_model_id`.
    pub fn resolve(&self, id: &str, base_model_id: &str) -> Option<&Arc<AdapterRecord>> {
        self.records
            .get(id)?
            .values()
            .rev()
            .find(|e| e.active && e.record.is_compatible_with(base_model_id))
            .map(|e| &e.record)
    }

    /// Active records of `kind` compatible with `base_model_id`.
    ///
    /// Lazily yields records ordered by version descending, registration order
    /// among equal versions. Every active compatible version is yielded, so an
    /// id may appear more than once; its first appearance is its highest version.
    pub fn list_active<'a>(
        &'a self,
        kind: AdapterKind,
        base_model_id: &'a str,
    ) -> impl Iterator<Item = &'a Arc<AdapterRecord>> + 'a {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(move |key| self.entry(&key.id, key.version))
            .filter(move |e| e.active && e.record.is_compatible_with(base_model_id))
            .map(|e| &e.record)
    }

    /// All entries, ordered by id then version.
    pub fn entries(&self) -> Vec<&RegistryEntry> {
        let mut ids: Vec<&String> = self.records.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| self.records[id].values())
            .collect()
    }

    pub fn latest_version(&self, id: &str) -> Option<u64> {
        self.high_water.get(id).copied()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            generation: self.generation,
            adapters: self.records.len(),
            ..Default::default()
        };
        for entry in self.records.values().flat_map(|v| v.values()) {
            stats.records += 1;
            if entry.active {
                stats.active += 1;
            }
        }
        stats
    }

    pub(crate) fn insert(&mut self, record: Arc<AdapterRecord>, digest: String) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = IndexKey {
            version: record.version,
            seq,
            id: record.id.clone(),
        };
        let index = self.by_kind.entry(record.kind).or_default();
        let at = index.partition_point(|k| {
            k.version > key.version || (k.version == key.version && k.seq < key.seq)
        });
        index.insert(at, key);

        let high = self.high_water.entry(record.id.clone()).or_insert(0);
        *high = (*high).max(record.version);

        self.records.entry(record.id.clone()).or_default().insert(
            record.version,
            RegistryEntry {
                record,
                active: true,
                digest,
                seq,
            },
        );
        self.generation += 1;
    }

    /// Flip the active flag. Returns whether anything changed.
    pub(crate) fn set_active(
        &mut self,
        id: &str,
        version: u64,
        active: bool,
    ) -> Result<bool, RegistryError> {
        let entry = self
            .records
            .get_mut(id)
            .and_then(|versions| versions.get_mut(&version))
            .ok_or_else(|| RegistryError::NotFound {
                id: id.to_string(),
                selector: VersionSelector::Exact(version),
            })?;
        if entry.active == active {
            return Ok(false);
        }
        entry.active = active;
        self.generation += 1;
        Ok(true)
    }

    /// Drop an inactive record. Active records are never removed.
    pub(crate) fn remove_inactive(&mut self, adapter: &AdapterRef) -> bool {
        let Some(versions) = self.records.get_mut(&adapter.id) else {
            return false;
        };
        let kind = match versions.get(&adapter.version) {
            Some(entry) if !entry.active => entry.record.kind,
            _ => return false,
        };
        versions.remove(&adapter.version);
        if versions.is_empty() {
            self.records.remove(&adapter.id);
        }
        if let Some(index) = self.by_kind.get_mut(&kind) {
            index.retain(|k| !(k.id == adapter.id && k.version == adapter.version));
        }
        self.generation += 1;
        true
    }
}

/// Catalog counts at one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    pub generation: u64,
    /// Distinct adapter ids
    pub adapters: usize,
    /// Registered versions across all ids
    pub records: usize,
    pub active: usize,
}
