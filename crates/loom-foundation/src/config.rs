//! Runtime configuration for the federation core.
//!
//! ```yaml
//! cache:
//!   memory_budget_bytes: 4294967296
//!   buckets: 16
//!   idle_ttl_secs: 900
//! planner:
//!   strategy_table:
//!     competing: gated
//!   gate_weighting: priority
//! registry:
//!   require_signatures: true
//!   trusted_signers:
//!     release: 3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c
//!   catalog_path: adapters.yaml
//! tenants:
//!   acme:
//!     max_concurrent_compositions: 8
//!     max_resident_bytes: 1073741824
//! default_quota:
//!   max_concurrent_compositions: 2
//!   max_resident_bytes: 268435456
//! maintenance_interval_secs: 60
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};

use loom_kernel::config::{self, FileFormat};
use loom_kernel::error::{KernelError, KernelResult};
use loom_kernel::tenant::TenantQuota;

use crate::cache::CacheConfig;
use crate::planner::{GateWeighting, KindLimits, StrategyOverrides, StrategyTable};
use crate::registry::{Ed25519Verifier, TrustPolicy};

/// Prefix for environment overrides, e.g. `LOOM_CACHE__BUCKETS`.
pub const ENV_PREFIX: &str = "LOOM";

/// Planner settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub strategy_table: StrategyOverrides,
    pub gate_weighting: GateWeighting,
    pub limits: KindLimits,
}

impl PlannerConfig {
    pub fn table(&self) -> StrategyTable {
        StrategyTable::with_overrides(&self.strategy_table)
    }
}

/// Registry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Reject unsigned records
    pub require_signatures: bool,
    /// Signing key id -> hex Ed25519 public key
    pub trusted_signers: BTreeMap<String, String>,
    /// Catalog registered at startup
    pub catalog_path: Option<PathBuf>,
}

impl RegistryConfig {
    /// Build the registration trust policy from the configured signers.
    pub fn trust_policy(&self) -> KernelResult<TrustPolicy> {
        if self.trusted_signers.is_empty() {
            if self.require_signatures {
                return Err(Report::new(KernelError::Internal(
                    "signatures are required but no trusted signers are configured".to_string(),
                ))
                .attach("registry.trusted_signers"));
            }
            return Ok(TrustPolicy::permissive());
        }

        let verifier = Ed25519Verifier::from_hex_keys(&self.trusted_signers)
            .map_err(KernelError::Internal)
            .map_err(Report::new)
            .attach("registry.trusted_signers")?;
        Ok(TrustPolicy::new(self.require_signatures, Some(Arc::new(verifier))))
    }
}

/// Everything needed to assemble a federation runtime. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub cache: CacheConfig,
    pub planner: PlannerConfig,
    pub registry: RegistryConfig,
    pub tenants: BTreeMap<String, TenantQuota>,
    /// Quota for tenants not listed in `tenants`; unlisted tenants are
    /// rejected when absent
    pub default_quota: Option<TenantQuota>,
    /// Period of registry GC and idle trimming. `0` disables maintenance.
    pub maintenance_interval_secs: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            planner: PlannerConfig::default(),
            registry: RegistryConfig::default(),
            tenants: BTreeMap::new(),
            default_quota: None,
            maintenance_interval_secs: 60,
        }
    }
}

impl FederationConfig {
    /// Load from a file, then apply `LOOM_*` environment overrides.
    ///
    /// A relative `registry.catalog_path` is resolved against the config
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let mut config: Self = config::load_with_env(path, ENV_PREFIX)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach_with(|| format!("loading federation config {}", path.display()))?;

        let resolved = match (&config.registry.catalog_path, path.parent()) {
            (Some(catalog), Some(dir)) if catalog.is_relative() => Some(dir.join(catalog)),
            _ => None,
        };
        if resolved.is_some() {
            config.registry.catalog_path = resolved;
        }
        Ok(config)
    }

    pub fn from_str(content: &str, format: FileFormat) -> KernelResult<Self> {
        config::from_str(content, format)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("parsing federation config")
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_secs > 0).then(|| Duration::from_secs(self.maintenance_interval_secs))
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        self.cache.idle_ttl_secs.map(Duration::from_secs)
    }
}
