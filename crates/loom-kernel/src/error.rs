//! Crate-level error types for `loom-kernel`.
//!
//! Two families live here:
//!
//! - [`FederationError`] is what the request path returns. Each subsystem
//!   error converts into it with `?`, so callers can match on the failing
//!   stage without string inspection.
//! - [`KernelError`] covers bootstrap work (config loading, catalog files)
//!   and travels inside an [`error_stack::Report`] via [`KernelResult`] so
//!   context can be attached as it propagates.
//!
//! # Usage
//!
//! ```rust,ignore
//! use error_stack::ResultExt;
//! use loom_kernel::error::{KernelError, KernelResult};
//!
//! fn read_catalog(path: &str) -> KernelResult<String> {
//!     let text = std::fs::read_to_string(path)
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach_with(|| format!("reading catalog {path}"))?;
//!     Ok(text)
//! }
//! ```

use thiserror::Error;

use crate::adapter::{AdapterKind, RegistryError};
use crate::backend::ForwardError;
use crate::composition::{CacheError, PlanningError};
use crate::config::ConfigError;
use crate::tenant::GuardError;

/// Every failure an inference call can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FederationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("Forward pass failed: {0}")]
    Forward(#[from] ForwardError),
}

impl FederationError {
    /// Whether the caller may retry the same request later.
    ///
    /// Only resource exhaustion qualifies; planning and guard rejections
    /// are deterministic for a given registry and quota state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// The role that failed to resolve, for unresolved-adapter planning errors.
    pub fn unresolved_role(&self) -> Option<AdapterKind> {
        match self {
            Self::Planning(err) => err.role(),
            _ => None,
        }
    }
}

pub type FederationResult<T> = Result<T, FederationError>;

/// Bootstrap error type for `loom-kernel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A configuration-related error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A catalog record was rejected by the registry.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
