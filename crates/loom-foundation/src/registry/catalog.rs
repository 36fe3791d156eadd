//! Adapter catalogs: record lists loaded from configuration files.

use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use loom_kernel::adapter::{AdapterRecord, AdapterRef, RegistryError};
use loom_kernel::config::{self, FileFormat};
use loom_kernel::error::{KernelError, KernelResult};

use super::{AdapterRegistry, Registration};

/// A list of adapter records, usually one file per deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterCatalog {
    #[serde(default)]
    pub adapters: Vec<AdapterRecord>,
}

impl AdapterCatalog {
    /// Load a catalog from any supported config format.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        config::load_config(path)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach_with(|| format!("loading adapter catalog {}", path.display()))
    }

    pub fn from_str(content: &str, format: FileFormat) -> KernelResult<Self> {
        config::from_str(content, format)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("parsing adapter catalog")
    }

    /// Records in registration order: by id, then ascending version.
    pub fn ordered(&self) -> Vec<&AdapterRecord> {
        let mut records: Vec<&AdapterRecord> = self.adapters.iter().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id).then(a.version.cmp(&b.version)));
        records
    }
}

/// What happened to each record of a catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogReport {
    pub registered: Vec<AdapterRef>,
    pub unchanged: Vec<AdapterRef>,
    pub rejected: Vec<(AdapterRef, RegistryError)>,
}

impl CatalogReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Fail with the first rejection, keeping the others as attachments.
    pub fn into_result(self) -> KernelResult<Self> {
        let mut rejected = self.rejected.iter();
        let Some((first_ref, first)) = rejected.next() else {
            return Ok(self);
        };
        let mut report = Report::new(KernelError::Registry(first.clone()))
            .attach(format!("catalog record {first_ref}"));
        for (adapter, err) in rejected {
            report = report.attach(format!("also rejected {adapter}: {err}"));
        }
        Err(report)
    }
}

impl AdapterRegistry {
    /// Register every record of `catalog`, continuing past rejections.
    pub fn register_catalog(&self, catalog: &AdapterCatalog) -> CatalogReport {
        let mut report = CatalogReport::default();
        for record in catalog.ordered() {
            let adapter = record.adapter_ref();
            match self.register(record.clone()) {
                Ok(Registration::Registered(r)) => report.registered.push(r),
                Ok(Registration::Unchanged(r)) => report.unchanged.push(r),
                Err(e) => report.rejected.push((adapter, e)),
            }
        }
        info!(
            registered = report.registered.len(),
            unchanged = report.unchanged.len(),
            rejected = report.rejected.len(),
            "catalog applied"
        );
        report
    }
}
