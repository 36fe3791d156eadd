//! Planning and cache errors

use std::fmt;

use thiserror::Error;

use super::plan::Fingerprint;
use crate::adapter::{AdapterKind, AdapterRef};

/// Errors raised while turning a request into a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("No {role} adapter resolves '{key}' for base model '{base_model_id}'")]
    UnresolvedAdapter {
        role: AdapterKind,
        key: String,
        base_model_id: String,
    },

    #[error("Dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error(
        "Adapter '{adapter}' depends on '{dependency}', which has no active version compatible with '{base_model_id}'"
    )]
    MissingDependency {
        adapter: String,
        dependency: String,
        base_model_id: String,
    },

    #[error(
        "Plan holds {kind} adapter '{incoming}' beyond the limit of {limit} (first was '{existing}')"
    )]
    KindConflict {
        kind: AdapterKind,
        existing: String,
        incoming: String,
        limit: usize,
    },
}

impl PlanningError {
    /// The role that failed to resolve, when the error is an unresolved adapter.
    pub fn role(&self) -> Option<AdapterKind> {
        match self {
            Self::UnresolvedAdapter { role, .. } => Some(*role),
            _ => None,
        }
    }
}

/// Why a composition could not be made resident
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// The composition does not fit the memory budget even after eviction
    MemoryBudget {
        required_bytes: u64,
        budget_bytes: u64,
        available_bytes: u64,
    },
    /// Artifact fetching kept failing with transient errors
    ArtifactIo {
        adapter: AdapterRef,
        attempts: u32,
        last_error: String,
    },
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryBudget {
                required_bytes,
                budget_bytes,
                available_bytes,
            } => write!(
                f,
                "memory budget: need {required_bytes} bytes, {available_bytes} of {budget_bytes} reclaimable"
            ),
            Self::ArtifactIo {
                adapter,
                attempts,
                last_error,
            } => write!(
                f,
                "artifact I/O for {adapter} failed after {attempts} attempts: {last_error}"
            ),
        }
    }
}

/// Errors raised by the composition cache
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: ExhaustionReason },

    #[error("Artifact for {adapter} failed checksum verification (expected {expected}, got {actual})")]
    Integrity {
        adapter: AdapterRef,
        expected: String,
        actual: String,
    },

    #[error("Artifact for {adapter} is unavailable: {message}")]
    ArtifactUnavailable { adapter: AdapterRef, message: String },

    #[error("Build of composition {fingerprint} ended without a result")]
    BuildAborted { fingerprint: Fingerprint },
}

impl CacheError {
    /// Whether a later retry of the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}
