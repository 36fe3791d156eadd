//! Tenant isolation
//!
//! Every request is admitted through [`TenantIsolationGuard::authorize`],
//! which takes one concurrent-composition slot. Once the request is planned,
//! [`TenantPermit::admit_plan`] checks the tenant's allow-list and reserves
//! the plan's bytes against its resident quota. Both are returned when the
//! permit drops, whichever way the request ends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use loom_kernel::composition::{CompositionPlan, CompositionRequest};
use loom_kernel::tenant::{GuardError, QuotaResource, TenantQuota};

#[derive(Debug)]
struct TenantState {
    quota: TenantQuota,
    active: AtomicU32,
    resident: AtomicU64,
}

impl TenantState {
    fn new(quota: TenantQuota) -> Self {
        Self {
            quota,
            active: AtomicU32::new(0),
            resident: AtomicU64::new(0),
        }
    }
}

/// Live quota usage of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantUsage {
    pub active_compositions: u32,
    pub resident_bytes: u64,
    pub quota: TenantQuota,
}

/// Per-tenant admission control.
#[derive(Debug, Default)]
pub struct TenantIsolationGuard {
    tenants: DashMap<String, Arc<TenantState>>,
    default_quota: Option<TenantQuota>,
}

impl TenantIsolationGuard {
    /// Create a guard from configured quotas. Tenants not listed receive
    /// `default_quota`, or are rejected when it is `None`.
    pub fn new<I>(quotas: I, default_quota: Option<TenantQuota>) -> Self
    where
        I: IntoIterator<Item = (String, TenantQuota)>,
    {
        Self {
            tenants: quotas
                .into_iter()
                .map(|(tenant, quota)| (tenant, Arc::new(TenantState::new(quota))))
                .collect(),
            default_quota,
        }
    }

    pub fn from_config(quotas: &BTreeMap<String, TenantQuota>, default_quota: Option<TenantQuota>) -> Self {
        Self::new(quotas.iter().map(|(t, q)| (t.clone(), q.clone())), default_quota)
    }

    /// Take a concurrent-composition slot for the request's tenant.
    pub fn authorize(&self, request: &CompositionRequest) -> Result<TenantPermit, GuardError> {
        let tenant_id = request.tenant_id.as_str();
        let state = self.state(tenant_id).inspect_err(|e| {
            warn!(tenant = tenant_id, error = %e, "request rejected");
        })?;

        let limit = state.quota.max_concurrent_compositions;
        state
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .map_err(|in_use| {
                let err = GuardError::QuotaExceeded {
                    tenant_id: tenant_id.to_string(),
                    resource: QuotaResource::ConcurrentCompositions,
                    limit: u64::from(limit),
                    requested: 1,
                    in_use: u64::from(in_use),
                };
                warn!(tenant = tenant_id, error = %err, "request rejected");
                err
            })?;

        debug!(tenant = tenant_id, "request authorized");
        Ok(TenantPermit {
            tenant_id: tenant_id.to_string(),
            state,
            reserved_bytes: 0,
        })
    }

    /// Current usage for `tenant_id`, if the tenant has been seen or configured.
    pub fn usage(&self, tenant_id: &str) -> Option<TenantUsage> {
        self.tenants.get(tenant_id).map(|state| TenantUsage {
            active_compositions: state.active.load(Ordering::Acquire),
            resident_bytes: state.resident.load(Ordering::Acquire),
            quota: state.quota.clone(),
        })
    }

    fn state(&self, tenant_id: &str) -> Result<Arc<TenantState>, GuardError> {
        if let Some(state) = self.tenants.get(tenant_id) {
            return Ok(Arc::clone(state.value()));
        }
        let quota = self.default_quota.clone().ok_or_else(|| GuardError::UnknownTenant {
            tenant_id: tenant_id.to_string(),
        })?;
        let state = self
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(TenantState::new(quota)));
        Ok(Arc::clone(state.value()))
    }
}

/// An admitted request. Releases its quota on drop.
#[derive(Debug)]
pub struct TenantPermit {
    tenant_id: String,
    state: Arc<TenantState>,
    reserved_bytes: u64,
}

impl TenantPermit {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Resident bytes this permit holds against the tenant's quota.
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    /// Check a plan against the tenant's allow-list and reserve its bytes.
    pub fn admit_plan(&mut self, plan: &CompositionPlan) -> Result<(), GuardError> {
        let quota = &self.state.quota;
        if let Some(forbidden) = plan.adapters.iter().find(|a| !quota.allows(&a.id)) {
            let err = GuardError::ForbiddenAdapter {
                tenant_id: self.tenant_id.clone(),
                adapter: forbidden.id.clone(),
            };
            warn!(tenant = %self.tenant_id, error = %err, "plan rejected");
            return Err(err);
        }

        let requested = plan.estimated_bytes;
        let limit = quota.max_resident_bytes;
        self.state
            .resident
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |resident| {
                resident
                    .checked_add(requested)
                    .filter(|total| *total <= limit)
            })
            .map_err(|in_use| {
                let err = GuardError::QuotaExceeded {
                    tenant_id: self.tenant_id.clone(),
                    resource: QuotaResource::ResidentBytes,
                    limit,
                    requested,
                    in_use,
                };
                warn!(tenant = %self.tenant_id, error = %err, "plan rejected");
                err
            })?;
        self.reserved_bytes += requested;
        Ok(())
    }
}

impl Drop for TenantPermit {
    fn drop(&mut self) {
        if self.reserved_bytes > 0 {
            self.state.resident.fetch_sub(self.reserved_bytes, Ordering::AcqRel);
        }
        self.state.active.fetch_sub(1, Ordering::AcqRel);
    }
}
