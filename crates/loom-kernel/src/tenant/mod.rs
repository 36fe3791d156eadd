//! Tenant quota declarations and isolation errors.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource limits and adapter allow-list for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuota {
    /// Compositions the tenant may have in flight at once
    pub max_concurrent_compositions: u32,
    /// Resident composition bytes the tenant may pin at once
    pub max_resident_bytes: u64,
    /// Adapter ids the tenant may use. `None` allows every adapter.
    #[serde(default)]
    pub allowed_adapters: Option<BTreeSet<String>>,
}

impl TenantQuota {
    pub fn new(max_concurrent_compositions: u32, max_resident_bytes: u64) -> Self {
        Self {
            max_concurrent_compositions,
            max_resident_bytes,
            allowed_adapters: None,
        }
    }

    pub fn with_allowed_adapters<I, S>(mut self, adapters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_adapters = Some(adapters.into_iter().map(Into::into).collect());
        self
    }

    pub fn allows(&self, adapter_id: &str) -> bool {
        self.allowed_adapters
            .as_ref()
            .is_none_or(|allowed| allowed.contains(adapter_id))
    }
}

/// The quota dimension a rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    ConcurrentCompositions,
    ResidentBytes,
}

impl fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConcurrentCompositions => write!(f, "concurrent compositions"),
            Self::ResidentBytes => write!(f, "resident bytes"),
        }
    }
}

/// Errors raised by tenant isolation checks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error(
        "Tenant '{tenant_id}' exceeded {resource} quota: requested {requested}, in use {in_use}, limit {limit}"
    )]
    QuotaExceeded {
        tenant_id: String,
        resource: QuotaResource,
        limit: u64,
        requested: u64,
        in_use: u64,
    },

    #[error("Tenant '{tenant_id}' may not use adapter '{adapter}'")]
    ForbiddenAdapter { tenant_id: String, adapter: String },

    #[error("Tenant '{tenant_id}' has no quota configured")]
    UnknownTenant { tenant_id: String },
}
