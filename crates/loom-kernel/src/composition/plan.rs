//! Composition plans and their fingerprints.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::strategy::{CompositionPattern, CompositionStrategy};
use crate::adapter::{AdapterKind, AdapterRecord, AdapterRef};
use crate::digest::CanonicalHasher;

/// Stable identifier of a plan's composed content; the cache key.
///
/// Computed over the base model, the ordered `(id, version)` pairs and the
/// strategy. Equal fingerprints mean byte-identical compositions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute<'a>(
        base_model_id: &str,
        adapters: impl IntoIterator<Item = &'a AdapterRef>,
        strategy: CompositionStrategy,
    ) -> Self {
        let mut hasher = CanonicalHasher::new();
        hasher.field("loom.fingerprint.v1").field(base_model_id);
        for adapter in adapters {
            hasher.field(&adapter.id).u64_field(adapter.version);
        }
        hasher.field(strategy.as_str());
        Self(hasher.finish())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }

    /// Bucket index in `0..buckets` derived from the leading digest bytes.
    pub fn bucket(&self, buckets: usize) -> usize {
        if buckets <= 1 {
            return 0;
        }
        let prefix = &self.0[..self.0.len().min(16)];
        let value = u64::from_str_radix(prefix, 16).unwrap_or(0);
        (value % buckets as u64) as usize
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered adapter set plus the strategy that combines it.
///
/// Plans are value objects: cheap to recompute, never cached themselves.
/// Records are held by `Arc` so a plan stays materializable even if the
/// registry retires them after planning.
#[derive(Debug, Clone, Serialize)]
pub struct CompositionPlan {
    pub base_model_id: String,
    /// Application order. Dependencies precede their dependents.
    pub adapters: Vec<Arc<AdapterRecord>>,
    pub strategy: CompositionStrategy,
    /// Decision-table pattern the adapter set matched
    pub pattern: CompositionPattern,
    /// True when the request's override chose the strategy
    pub overridden: bool,
    pub fingerprint: Fingerprint,
    /// Sum of declared artifact sizes
    pub estimated_bytes: u64,
}

impl CompositionPlan {
    pub fn new(
        base_model_id: impl Into<String>,
        adapters: Vec<Arc<AdapterRecord>>,
        strategy: CompositionStrategy,
        pattern: CompositionPattern,
        overridden: bool,
    ) -> Self {
        let base_model_id = base_model_id.into();
        let refs: Vec<AdapterRef> = adapters.iter().map(|a| a.adapter_ref()).collect();
        let fingerprint = Fingerprint::compute(&base_model_id, &refs, strategy);
        let estimated_bytes = adapters
            .iter()
            .map(|a| a.artifact_reference.size_bytes)
            .sum();
        Self {
            base_model_id,
            adapters,
            strategy,
            pattern,
            overridden,
            fingerprint,
            estimated_bytes,
        }
    }

    pub fn adapter_refs(&self) -> Vec<AdapterRef> {
        self.adapters.iter().map(|a| a.adapter_ref()).collect()
    }

    pub fn adapter_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id.as_str()).collect()
    }

    pub fn count_of(&self, kind: AdapterKind) -> usize {
        self.adapters.iter().filter(|a| a.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
