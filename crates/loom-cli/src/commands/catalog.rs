//! `loom catalog` command implementations

use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::Serialize;

use loom_foundation::registry::{RegistryEntry, TrustPolicy};
use loom_foundation::{FederationConfig, FilesystemArtifactStore};
use loom_kernel::adapter::{AdapterKind, AdapterRef};
use loom_kernel::backend::ArtifactStore;

use super::{load_registry, report};
use crate::output::{OutputFormat, print_json, print_table};

#[derive(Debug, Clone, Serialize)]
struct AdapterRow {
    id: String,
    version: u64,
    kind: AdapterKind,
    target: Option<String>,
    priority: i32,
    active: bool,
    base_models: Vec<String>,
    capabilities: Vec<String>,
    dependencies: Vec<String>,
}

impl From<&RegistryEntry> for AdapterRow {
    fn from(entry: &RegistryEntry) -> Self {
        let record = &entry.record;
        Self {
            id: record.id.clone(),
            version: record.version,
            kind: record.kind,
            target: record.target.clone(),
            priority: record.priority,
            active: entry.active,
            base_models: record.compatible_base_models.iter().cloned().collect(),
            capabilities: record.capabilities.iter().cloned().collect(),
            dependencies: record.dependencies.iter().cloned().collect(),
        }
    }
}

/// Execute the `loom catalog list` command
pub fn run_list(
    path: &Path,
    base: Option<&str>,
    kind: Option<AdapterKind>,
    all: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (registry, outcome) = load_registry(path, TrustPolicy::permissive())?;
    if !outcome.is_clean() {
        eprintln!(
            "{} {} record(s) rejected; run `loom catalog validate` for details",
            "Warning".yellow(),
            outcome.rejected.len()
        );
    }

    let snapshot = registry.snapshot();
    let mut rows: Vec<AdapterRow> = snapshot
        .entries()
        .into_iter()
        .filter(|e| e.active)
        .filter(|e| kind.is_none_or(|k| e.record.kind == k))
        .filter(|e| base.is_none_or(|b| e.record.is_compatible_with(b)))
        .map(AdapterRow::from)
        .collect();
    if !all {
        // Entries are ordered by id then ascending version; keep the last of each id.
        rows.reverse();
        rows.dedup_by(|later, kept| later.id == kept.id);
        rows.reverse();
    }

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => print_table(&rows)?,
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("  No adapters match.");
                return Ok(());
            }
            for row in &rows {
                println!(
                    "  {} {} {} {}",
                    format!("{}@{}", row.id, row.version).cyan(),
                    row.kind.to_string().bold(),
                    row.target.as_deref().unwrap_or("-"),
                    format!("priority {}", row.priority).dimmed()
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct Rejection {
    adapter: String,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct ArtifactCheck {
    adapter: String,
    uri: String,
    ok: bool,
    detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ValidationReport {
    registered: Vec<String>,
    unchanged: Vec<String>,
    rejected: Vec<Rejection>,
    artifacts: Vec<ArtifactCheck>,
}

impl ValidationReport {
    fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.artifacts.iter().all(|a| a.ok)
    }
}

/// Execute the `loom catalog validate` command
pub async fn run_validate(
    config: &FederationConfig,
    path: &Path,
    verify_artifacts: bool,
    artifact_root: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let trust = config.registry.trust_policy().map_err(report)?;
    let (registry, outcome) = load_registry(path, trust)?;

    let mut artifacts = Vec::new();
    if verify_artifacts {
        let store = match artifact_root.or_else(|| path.parent().map(Path::to_path_buf)) {
            Some(root) => FilesystemArtifactStore::with_root(root),
            None => FilesystemArtifactStore::new(),
        };
        for entry in registry.snapshot().entries() {
            artifacts.push(check_artifact(&store, entry).await);
        }
    }

    let names = |refs: &[AdapterRef]| refs.iter().map(ToString::to_string).collect::<Vec<_>>();
    let summary = ValidationReport {
        registered: names(&outcome.registered),
        unchanged: names(&outcome.unchanged),
        rejected: outcome
            .rejected
            .iter()
            .map(|(adapter, err)| Rejection {
                adapter: adapter.to_string(),
                error: err.to_string(),
            })
            .collect(),
        artifacts,
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_table(&summary.rejected)?;
            print_table(&summary.artifacts)?;
        }
        OutputFormat::Text => print_validation(&summary),
    }

    if summary.is_clean() {
        Ok(())
    } else {
        anyhow::bail!("catalog {} failed validation", path.display())
    }
}

async fn check_artifact(store: &FilesystemArtifactStore, entry: &RegistryEntry) -> ArtifactCheck {
    let record = &entry.record;
    let reference = &record.artifact_reference;
    let detail = match store.fetch(reference).await {
        Ok(bytes) => reference
            .verify(&bytes)
            .err()
            .map(|actual| format!("checksum mismatch: expected {}, got {actual}", reference.checksum)),
        Err(err) => Some(err.to_string()),
    };
    ArtifactCheck {
        adapter: record.adapter_ref().to_string(),
        uri: reference.uri.clone(),
        ok: detail.is_none(),
        detail,
    }
}

fn print_validation(summary: &ValidationReport) {
    println!(
        "{} {} registered, {} unchanged, {} rejected",
        "→".green(),
        summary.registered.len(),
        summary.unchanged.len(),
        summary.rejected.len()
    );
    for rejection in &summary.rejected {
        println!("  {} {}: {}", "✗".red(), rejection.adapter, rejection.error);
    }
    for check in &summary.artifacts {
        match &check.detail {
            None => println!("  {} {} ({})", "✓".green(), check.adapter, check.uri),
            Some(detail) => println!("  {} {} ({}): {}", "✗".red(), check.adapter, check.uri, detail),
        }
    }
    if summary.is_clean() {
        println!("{} Catalog is valid", "✓".green());
    }
}
