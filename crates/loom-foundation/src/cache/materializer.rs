//! Loads adapter artifacts and lays them out per composition strategy.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{Instrument, debug, warn};

use loom_kernel::adapter::{AdapterKind, AdapterRecord};
use loom_kernel::backend::{ArtifactError, ArtifactStore};
use loom_kernel::composition::{
    CacheError, ComposedLayer, ComposedWeights, CompositionPlan, CompositionStrategy,
    ExhaustionReason,
};

use crate::planner::GateWeighting;
use crate::retry::RetryPolicy;

/// Turns a plan into [`ComposedWeights`].
pub struct Materializer {
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    weighting: GateWeighting,
}

impl Materializer {
    pub fn new(store: Arc<dyn ArtifactStore>, retry: RetryPolicy, weighting: GateWeighting) -> Self {
        Self {
            store,
            retry,
            weighting,
        }
    }

    pub async fn materialize(&self, plan: &CompositionPlan) -> Result<ComposedWeights, CacheError> {
        let payloads = try_join_all(plan.adapters.iter().map(|a| self.load(a))).await?;
        let size_bytes = payloads.iter().map(|p| p.len() as u64).sum();
        let layers = layout(plan, payloads, self.weighting);

        Ok(ComposedWeights {
            fingerprint: plan.fingerprint.clone(),
            base_model_id: plan.base_model_id.clone(),
            strategy: plan.strategy,
            layers,
            size_bytes,
        })
    }

    /// Fetch with bounded retry on transient errors, then verify the checksum.
    async fn load(&self, record: &AdapterRecord) -> Result<Arc<[u8]>, CacheError> {
        let adapter = record.adapter_ref();
        let reference = &record.artifact_reference;
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;

        let bytes = loop {
            let attempt_span = tracing::debug_span!("loom.artifact.fetch", adapter = %adapter, attempt);
            if attempt > 0 {
                let delay = self.retry.backoff.delay(attempt - 1);
                tokio::time::sleep(delay).instrument(attempt_span.clone()).await;
            }
            attempt += 1;

            match self.store.fetch(reference).instrument(attempt_span).await {
                Ok(bytes) => break bytes,
                Err(ArtifactError::Transient(message)) if attempt < max_attempts => {
                    warn!(adapter = %adapter, attempt, max_attempts, error = %message, "artifact fetch failed, retrying");
                }
                Err(ArtifactError::Transient(message)) => {
                    return Err(CacheError::ResourceExhausted {
                        reason: ExhaustionReason::ArtifactIo {
                            adapter,
                            attempts: attempt,
                            last_error: message,
                        },
                    });
                }
                Err(ArtifactError::NotFound(message)) => {
                    return Err(CacheError::ArtifactUnavailable { adapter, message });
                }
            }
        };

        reference
            .verify(&bytes)
            .map_err(|actual| CacheError::Integrity {
                adapter: adapter.clone(),
                expected: reference.checksum.clone(),
                actual,
            })?;
        debug!(adapter = %adapter, bytes = bytes.len(), attempts = attempt, "artifact loaded");
        Ok(Arc::from(bytes))
    }
}

/// Position each payload per the plan's strategy.
///
/// - additive: one stage, every gate 1
/// - gated: one stage; kinds with several candidates share gates from
///   `weighting`, while adapters another member depends on stay at 1
/// - sequential: one stage per adapter, in plan order
fn layout(
    plan: &CompositionPlan,
    payloads: Vec<Arc<[u8]>>,
    weighting: GateWeighting,
) -> Vec<ComposedLayer> {
    let gates: Vec<f32> = match plan.strategy {
        CompositionStrategy::Gated => gate_weights(&plan.adapters, weighting),
        CompositionStrategy::Additive | CompositionStrategy::Sequential => {
            vec![1.0; plan.adapters.len()]
        }
    };

    plan.adapters
        .iter()
        .zip(payloads)
        .zip(gates)
        .enumerate()
        .map(|(position, ((record, payload), gate))| ComposedLayer {
            adapter: record.adapter_ref(),
            kind: record.kind,
            rank: record.rank,
            scale: record.scale,
            gate,
            stage: match plan.strategy {
                CompositionStrategy::Sequential => position,
                _ => 0,
            },
            payload,
        })
        .collect()
}

fn gate_weights(adapters: &[Arc<AdapterRecord>], weighting: GateWeighting) -> Vec<f32> {
    let required: HashSet<&str> = adapters
        .iter()
        .flat_map(|a| a.dependencies.iter().map(String::as_str))
        .collect();
    let mut groups: BTreeMap<AdapterKind, Vec<usize>> = BTreeMap::new();
    for (position, adapter) in adapters.iter().enumerate() {
        if !required.contains(adapter.id.as_str()) {
            groups.entry(adapter.kind).or_default().push(position);
        }
    }

    let mut gates = vec![1.0; adapters.len()];
    for positions in groups.values().filter(|p| p.len() > 1) {
        let members: Vec<&AdapterRecord> = positions.iter().map(|&i| adapters[i].as_ref()).collect();
        for (&position, weight) in positions.iter().zip(weighting.weights(&members)) {
            gates[position] = weight;
        }
    }
    gates
}
