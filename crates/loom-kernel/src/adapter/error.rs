//! Error types for adapter registration and lookup

use thiserror::Error;

use super::record::VersionSelector;

/// Errors raised by the adapter registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Adapter '{id}' not found at {selector}")]
    NotFound { id: String, selector: VersionSelector },

    #[error(
        "Adapter '{id}' version {version} already registered with different content (existing {existing_digest}, incoming {incoming_digest})"
    )]
    Conflict {
        id: String,
        version: u64,
        existing_digest: String,
        incoming_digest: String,
    },

    #[error("Adapter '{id}' version {version} is not newer than registered version {latest}")]
    NonMonotonicVersion { id: String, version: u64, latest: u64 },

    #[error("Invalid adapter record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("Adapter '{id}' version {version} failed trust verification: {reason}")]
    Untrusted {
        id: String,
        version: u64,
        reason: String,
    },
}
