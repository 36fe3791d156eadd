//! CLI command implementations

pub mod catalog;
pub mod config_cmd;
pub mod plan;

use std::path::Path;

use error_stack::Report;
use loom_foundation::registry::{AdapterCatalog, AdapterRegistry, CatalogReport, TrustPolicy};
use loom_foundation::FederationConfig;
use loom_kernel::error::KernelError;
use tracing::debug;

/// Flatten an error-stack report, attachments included, into an anyhow error.
pub fn report(err: Report<KernelError>) -> anyhow::Error {
    anyhow::anyhow!("{err:?}")
}

/// The configuration given with `--config`, or the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FederationConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            FederationConfig::load(path).map_err(report)
        }
        None => Ok(FederationConfig::default()),
    }
}

/// Load `path` into a fresh registry.
pub fn load_registry(
    path: &Path,
    trust: TrustPolicy,
) -> anyhow::Result<(AdapterRegistry, CatalogReport)> {
    let catalog = AdapterCatalog::load(path).map_err(report)?;
    let registry = AdapterRegistry::new(trust);
    let report = registry.register_catalog(&catalog);
    debug!(
        path = %path.display(),
        registered = report.registered.len(),
        unchanged = report.unchanged.len(),
        rejected = report.rejected.len(),
        "catalog loaded"
    );
    Ok((registry, report))
}
