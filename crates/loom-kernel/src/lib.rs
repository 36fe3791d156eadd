//! Loom Kernel
//!
//! Contracts shared by every layer of the adapter federation core:
//!
//! - [`adapter`]: adapter records, versions, artifact references and trust hooks
//! - [`composition`]: requests, plans, fingerprints and composed weights
//! - [`tenant`]: per-tenant quota declarations and isolation errors
//! - [`backend`]: the forward-pass and artifact-store collaborators
//! - [`telemetry`]: composition events and the sink they are emitted to
//! - [`config`]: multi-format configuration loading
//! - [`error`]: the unified [`FederationError`] and bootstrap [`KernelError`]
//!
//! Implementations live in `loom-foundation`; this crate only defines the
//! shapes they agree on.

pub mod adapter;
pub mod backend;
pub mod composition;
pub mod config;
pub mod digest;
pub mod error;
pub mod telemetry;
pub mod tenant;

pub use adapter::{
    AdapterKind, AdapterRecord, AdapterRecordBuilder, AdapterRef, ArtifactReference,
    RegistryError, Signature, SignatureVerifier, VersionSelector,
};
pub use backend::{
    ArtifactError, ArtifactStore, ForwardError, ForwardOutput, ForwardPass, ToolCall, ToolSpec,
};
pub use composition::{
    CacheError, ComposedLayer, ComposedWeights, CompositionPattern, CompositionPlan,
    CompositionRequest, CompositionStrategy, ExhaustionReason, Fingerprint, PlanningError,
};
pub use error::{FederationError, FederationResult, KernelError, KernelResult};
pub use telemetry::{CompositionEvent, TelemetrySink};
pub use tenant::{GuardError, QuotaResource, TenantQuota};
