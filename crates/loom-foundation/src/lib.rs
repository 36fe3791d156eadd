//! Loom Foundation
//!
//! Implementations of the adapter federation core defined by `loom-kernel`.

// registry module - versioned adapter catalog with copy-on-write snapshots
pub mod registry;

// planner module - request resolution and strategy selection
pub mod planner;

// cache module - single-flight composition cache with byte budget
pub mod cache;

// guard module - per-tenant quotas and allow-lists
pub mod guard;

// router module - inference entry point
pub mod router;

// retry module - backoff for artifact I/O
pub mod retry;

pub mod artifact;
pub mod config;
pub mod runtime;
pub mod telemetry;

pub use artifact::{FilesystemArtifactStore, InMemoryArtifactStore};
pub use cache::{
    CacheConfig, CacheEntryInfo, CacheStats, CompositionCache, CompositionHandle, Materializer,
    MemoryLedger,
};
pub use config::{FederationConfig, PlannerConfig, RegistryConfig};
pub use guard::{TenantIsolationGuard, TenantPermit, TenantUsage};
pub use planner::{CompositionPlanner, GateWeighting, KindLimits, StrategyOverrides, StrategyTable};
pub use registry::{
    AdapterCatalog, AdapterRegistry, CatalogReport, Ed25519Verifier, Registration,
    RegistrySnapshot, RegistryStats, TrustPolicy,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use router::{GcReport, InferenceResult, InferenceRouter};
pub use runtime::{FederationRuntime, FederationRuntimeBuilder};
pub use telemetry::{
    BufferedTelemetrySink, CompositeTelemetrySink, NoopTelemetrySink, TracingTelemetrySink,
};
