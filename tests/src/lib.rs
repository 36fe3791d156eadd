//! Loom Testing Framework
//!
//! Test doubles for the federation core's collaborators, so routing, caching
//! and quota behavior can be exercised without a model server or blob store.

pub mod backend;
pub mod fixtures;
pub mod store;
pub mod telemetry;

pub use backend::MockForwardPass;
pub use fixtures::{Federation, FederationBuilder, adapter};
pub use store::MockArtifactStore;
pub use telemetry::RecordingTelemetrySink;
