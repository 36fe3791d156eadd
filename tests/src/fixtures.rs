//! Assembled federation cores over the mock collaborators.

use std::sync::Arc;

use loom_foundation::cache::{CacheConfig, CompositionCache, Materializer};
use loom_foundation::guard::TenantIsolationGuard;
use loom_foundation::planner::{CompositionPlanner, GateWeighting};
use loom_foundation::registry::{AdapterRegistry, Registration};
use loom_foundation::retry::RetryPolicy;
use loom_foundation::router::InferenceRouter;
use loom_kernel::adapter::{
    AdapterKind, AdapterRecord, AdapterRecordBuilder, ArtifactReference, RegistryError,
};
use loom_kernel::composition::CompositionRequest;
use loom_kernel::digest::sha256_hex;
use loom_kernel::tenant::TenantQuota;

use crate::backend::MockForwardPass;
use crate::store::MockArtifactStore;
use crate::telemetry::RecordingTelemetrySink;

/// Base model every fixture adapter is compatible with.
pub const BASE_MODEL: &str = "base";

/// Start a record for `BASE_MODEL`. The artifact is filled in on registration.
pub fn adapter(id: &str, kind: AdapterKind) -> AdapterRecordBuilder {
    AdapterRecord::builder(id, kind).compatible_with(BASE_MODEL)
}

/// Deterministic artifact bytes for one adapter version.
pub fn payload(id: &str, version: u64, size: usize) -> Vec<u8> {
    format!("{id}@{version};").into_bytes().into_iter().cycle().take(size).collect()
}

/// Builds a [`Federation`].
pub struct FederationBuilder {
    adapters: Vec<AdapterRecordBuilder>,
    quotas: Vec<(String, TenantQuota)>,
    default_quota: Option<TenantQuota>,
    cache: CacheConfig,
    payload_size: usize,
    weighting: GateWeighting,
    planner: CompositionPlanner,
    store: MockArtifactStore,
    backend: MockForwardPass,
}

impl Default for FederationBuilder {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            quotas: Vec::new(),
            default_quota: Some(TenantQuota::new(64, u64::MAX)),
            cache: CacheConfig::default(),
            payload_size: 64,
            weighting: GateWeighting::Uniform,
            planner: CompositionPlanner::default(),
            store: MockArtifactStore::new(),
            backend: MockForwardPass::new(),
        }
    }
}

impl FederationBuilder {
    pub fn adapter(mut self, builder: AdapterRecordBuilder) -> Self {
        self.adapters.push(builder);
        self
    }

    pub fn quota(mut self, tenant: &str, quota: TenantQuota) -> Self {
        self.quotas.push((tenant.to_string(), quota));
        self
    }

    pub fn default_quota(mut self, quota: Option<TenantQuota>) -> Self {
        self.default_quota = quota;
        self
    }

    pub fn budget(mut self, bytes: u64) -> Self {
        self.cache.memory_budget_bytes = bytes;
        self
    }

    pub fn buckets(mut self, buckets: usize) -> Self {
        self.cache.buckets = buckets;
        self
    }

    /// Artifact size of every adapter registered through the fixture.
    pub fn payload_size(mut self, size: usize) -> Self {
        self.payload_size = size;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.cache.artifact_retry = policy;
        self
    }

    pub fn weighting(mut self, weighting: GateWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn planner(mut self, planner: CompositionPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn store(mut self, store: MockArtifactStore) -> Self {
        self.store = store;
        self
    }

    pub fn backend(mut self, backend: MockForwardPass) -> Self {
        self.backend = backend;
        self
    }

    /// Register every adapter and assemble the router.
    ///
    /// # Panics
    ///
    /// If an adapter is rejected by the registry.
    pub fn build(self) -> Federation {
        let registry = Arc::new(AdapterRegistry::default());
        let materializer = Materializer::new(
            Arc::new(self.store.clone()),
            self.cache.artifact_retry.clone(),
            self.weighting,
        );
        let cache = CompositionCache::new(&self.cache, materializer);
        let guard = Arc::new(TenantIsolationGuard::new(self.quotas, self.default_quota));
        let telemetry = RecordingTelemetrySink::new();
        let router = Arc::new(
            InferenceRouter::new(
                Arc::clone(&registry),
                self.planner,
                cache.clone(),
                Arc::clone(&guard),
                Arc::new(self.backend.clone()),
            )
            .with_telemetry(Arc::new(telemetry.clone())),
        );

        let federation = Federation {
            router,
            registry,
            cache,
            guard,
            store: self.store,
            backend: self.backend,
            telemetry,
            payload_size: self.payload_size,
        };
        for builder in self.adapters {
            if let Err(err) = federation.register(builder) {
                panic!("fixture adapter rejected: {err}");
            }
        }
        federation
    }
}

/// A federation core wired to mock collaborators.
pub struct Federation {
    pub router: Arc<InferenceRouter>,
    pub registry: Arc<AdapterRegistry>,
    pub cache: CompositionCache,
    pub guard: Arc<TenantIsolationGuard>,
    pub store: MockArtifactStore,
    pub backend: MockForwardPass,
    pub telemetry: RecordingTelemetrySink,
    payload_size: usize,
}

impl Federation {
    pub fn builder() -> FederationBuilder {
        FederationBuilder::default()
    }

    /// Store a payload for the record and register it.
    pub fn register(&self, builder: AdapterRecordBuilder) -> Result<Registration, RegistryError> {
        let draft = builder.build();
        let uri = format!("mem://{}/{}", draft.id, draft.version);
        let bytes = payload(&draft.id, draft.version, self.payload_size);
        let record = AdapterRecord {
            artifact_reference: ArtifactReference::new(
                uri.clone(),
                sha256_hex(&bytes),
                bytes.len() as u64,
            ),
            ..draft
        };
        self.store.insert(uri, bytes);
        self.registry.register(record)
    }

    /// A request against [`BASE_MODEL`].
    pub fn request(&self, tenant: &str, retailer: &str, brand: &str, task: &str) -> CompositionRequest {
        CompositionRequest::new(tenant, retailer, brand, task, BASE_MODEL)
    }
}
