//! Materialized compositions handed to the forward pass.

use std::sync::Arc;

use super::plan::Fingerprint;
use super::strategy::CompositionStrategy;
use crate::adapter::{AdapterKind, AdapterRef};

/// One adapter delta positioned inside a composition.
#[derive(Debug, Clone)]
pub struct ComposedLayer {
    pub adapter: AdapterRef,
    pub kind: AdapterKind,
    pub rank: u32,
    pub scale: f32,
    /// Blend weight; 1.0 unless the layer belongs to a gated group
    pub gate: f32,
    /// Application stage. Layers sharing a stage are applied together.
    pub stage: usize,
    /// Verified artifact bytes
    pub payload: Arc<[u8]>,
}

/// A loaded, strategy-applied adapter stack. Shared read-only by every
/// caller holding the same fingerprint.
#[derive(Debug, Clone)]
pub struct ComposedWeights {
    pub fingerprint: Fingerprint,
    pub base_model_id: String,
    pub strategy: CompositionStrategy,
    pub layers: Vec<ComposedLayer>,
    /// Resident cost of the payloads
    pub size_bytes: u64,
}

impl ComposedWeights {
    pub fn adapter_refs(&self) -> Vec<AdapterRef> {
        self.layers.iter().map(|l| l.adapter.clone()).collect()
    }

    /// Number of distinct application stages.
    pub fn stage_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.stage + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn references(&self, adapter: &AdapterRef) -> bool {
        self.layers.iter().any(|l| &l.adapter == adapter)
    }
}
