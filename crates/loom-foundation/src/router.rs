//! Inference routing
//!
//! [`InferenceRouter::infer`] drives one call through the federation core:
//!
//! ```text
//! authorize -> snapshot -> plan -> admit -> get_or_build -> forward -> telemetry
//! ```
//!
//! Every call that gets past planning emits one [`CompositionEvent`], carrying
//! the error when a later step failed.
//!
//! The tenant permit and the cache handle are owned by the call, so every
//! exit path (including a dropped future) returns them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{Instrument, debug, warn};

use loom_kernel::adapter::AdapterRef;
use loom_kernel::backend::{ForwardOutput, ForwardPass, ToolCall, ToolSpec};
use loom_kernel::composition::{CompositionPlan, CompositionRequest, CompositionStrategy, Fingerprint};
use loom_kernel::error::FederationResult;
use loom_kernel::telemetry::{CompositionEvent, TelemetrySink};

use crate::cache::CompositionCache;
use crate::guard::{TenantIsolationGuard, TenantPermit};
use crate::planner::CompositionPlanner;
use crate::registry::AdapterRegistry;
use crate::telemetry::TracingTelemetrySink;

/// What one inference call produced and how it was composed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub output: String,
    pub tool_calls: Vec<ToolCall>,
    /// Adapters applied, in application order
    pub adapters_used: Vec<AdapterRef>,
    pub strategy: CompositionStrategy,
    pub fingerprint: Fingerprint,
    pub cache_hit: bool,
    /// Planning plus cache acquisition
    pub composition_time: Duration,
    pub token_count: u32,
    /// End to end, including the forward pass
    pub latency: Duration,
}

/// Outcome of [`InferenceRouter::collect_garbage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Inactive records dropped from the registry
    pub removed: Vec<AdapterRef>,
    /// Cache entries invalidated because they were built from a removed record
    pub invalidated: usize,
}

/// Entry point of the federation core.
pub struct InferenceRouter {
    registry: Arc<AdapterRegistry>,
    planner: CompositionPlanner,
    cache: CompositionCache,
    guard: Arc<TenantIsolationGuard>,
    backend: Arc<dyn ForwardPass>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl InferenceRouter {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        planner: CompositionPlanner,
        cache: CompositionCache,
        guard: Arc<TenantIsolationGuard>,
        backend: Arc<dyn ForwardPass>,
    ) -> Self {
        Self {
            registry,
            planner,
            cache,
            guard,
            backend,
            telemetry: Arc::new(TracingTelemetrySink),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &CompositionCache {
        &self.cache
    }

    pub fn guard(&self) -> &Arc<TenantIsolationGuard> {
        &self.guard
    }

    /// Plan `request` against the current registry without building or
    /// running anything.
    pub fn plan(&self, request: &CompositionRequest) -> FederationResult<CompositionPlan> {
        let snapshot = self.registry.snapshot();
        Ok(self.planner.plan(request, &snapshot)?)
    }

    /// Run one inference call.
    pub async fn infer(
        &self,
        request: &CompositionRequest,
        prompt: &str,
        tools: &[ToolSpec],
    ) -> FederationResult<InferenceResult> {
        let span = tracing::info_span!(
            "loom.infer",
            tenant = %request.tenant_id,
            base_model = %request.base_model_id,
            task = %request.task,
        );
        self.run(request, prompt, tools)
            .instrument(span.clone())
            .await
            .inspect_err(|e| {
                let _entered = span.enter();
                warn!(error = %e, retryable = e.is_retryable(), "inference failed");
            })
    }

    async fn run(
        &self,
        request: &CompositionRequest,
        prompt: &str,
        tools: &[ToolSpec],
    ) -> FederationResult<InferenceResult> {
        let started = Instant::now();
        let permit = self.guard.authorize(request)?;

        let snapshot = self.registry.snapshot();
        let plan = self.planner.plan(request, &snapshot)?;
        drop(snapshot);

        let mut cache_hit = false;
        let forwarded = self
            .compose_and_forward(&plan, permit, prompt, tools, started, &mut cache_hit)
            .await;
        let adapters_used = plan.adapter_refs();
        let mut event = CompositionEvent {
            tenant_id: request.tenant_id.clone(),
            fingerprint: plan.fingerprint.clone(),
            strategy: plan.strategy,
            adapters_used: adapters_used.clone(),
            composition_time_ms: 0,
            cache_hit,
            error: None,
        };
        let (output, composition_time) = match forwarded {
            Ok(forwarded) => forwarded,
            Err(e) => {
                event.composition_time_ms = started.elapsed().as_millis() as u64;
                event.error = Some(e.to_string());
                self.telemetry.emit(&event);
                return Err(e);
            }
        };
        event.composition_time_ms = composition_time.as_millis() as u64;
        self.telemetry.emit(&event);

        Ok(InferenceResult {
            output: output.text,
            tool_calls: output.tool_calls,
            adapters_used,
            strategy: plan.strategy,
            fingerprint: plan.fingerprint,
            cache_hit,
            composition_time,
            token_count: output.token_count,
            latency: started.elapsed(),
        })
    }

    /// Admit, acquire and forward. The permit and the cache handle are both
    /// released before this returns.
    async fn compose_and_forward(
        &self,
        plan: &CompositionPlan,
        mut permit: TenantPermit,
        prompt: &str,
        tools: &[ToolSpec],
        started: Instant,
        cache_hit: &mut bool,
    ) -> FederationResult<(ForwardOutput, Duration)> {
        permit.admit_plan(plan)?;

        let handle = self.cache.get_or_build(plan).await?;
        *cache_hit = handle.cache_hit();
        let composition_time = started.elapsed();
        debug!(
            fingerprint = plan.fingerprint.short(),
            cache_hit = *cache_hit,
            composition_ms = composition_time.as_millis() as u64,
            "composition ready"
        );

        let output = self
            .backend
            .forward(&plan.base_model_id, handle.weights(), prompt, tools)
            .await?;
        drop(handle);
        drop(permit);
        Ok((output, composition_time))
    }

    /// Drop inactive registry records no held composition uses, and
    /// invalidate cache entries built from them.
    pub fn collect_garbage(&self) -> GcReport {
        let pinned = self.cache.pinned_adapters();
        let removed = self.registry.collect_garbage(&pinned);
        let invalidated = self.cache.invalidate_adapters(&removed);
        GcReport {
            removed,
            invalidated,
        }
    }
}
