//! `loom plan` command implementation

use colored::Colorize;
use serde::Serialize;

use loom_foundation::{CompositionPlanner, FederationConfig};
use loom_kernel::composition::{CompositionPattern, CompositionRequest, CompositionStrategy};

use super::{load_registry, report};
use crate::cli::PlanArgs;
use crate::output::{OutputFormat, print_json, print_table};

#[derive(Debug, Clone, Serialize)]
struct PlanView {
    fingerprint: String,
    base_model_id: String,
    strategy: CompositionStrategy,
    pattern: CompositionPattern,
    overridden: bool,
    estimated_bytes: u64,
    adapters: Vec<PlannedAdapter>,
}

#[derive(Debug, Clone, Serialize)]
struct PlannedAdapter {
    position: usize,
    adapter: String,
    kind: String,
    priority: i32,
    size_bytes: u64,
}

/// Execute the `loom plan` command
pub fn run(config: &FederationConfig, args: &PlanArgs, format: OutputFormat) -> anyhow::Result<()> {
    let trust = config.registry.trust_policy().map_err(report)?;
    let (registry, _) = load_registry(&args.catalog, trust)?;

    let mut request = CompositionRequest::new(
        &args.tenant,
        &args.retailer,
        &args.brand,
        &args.task,
        &args.base,
    );
    if let Some(strategy) = args.strategy {
        request = request.with_strategy_override(strategy);
    }
    for role in &args.optional {
        request = request.with_optional_role(*role);
    }

    let planner = CompositionPlanner::new(config.planner.table(), config.planner.limits);
    let plan = planner.plan(&request, &registry.snapshot())?;

    let view = PlanView {
        fingerprint: plan.fingerprint.to_string(),
        base_model_id: plan.base_model_id.clone(),
        strategy: plan.strategy,
        pattern: plan.pattern,
        overridden: plan.overridden,
        estimated_bytes: plan.estimated_bytes,
        adapters: plan
            .adapters
            .iter()
            .enumerate()
            .map(|(position, record)| PlannedAdapter {
                position,
                adapter: record.adapter_ref().to_string(),
                kind: record.kind.to_string(),
                priority: record.priority,
                size_bytes: record.artifact_reference.size_bytes,
            })
            .collect(),
    };

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => print_table(&view.adapters)?,
        OutputFormat::Text => {
            println!("{} {}", "Fingerprint:".bold(), view.fingerprint.cyan());
            let origin = if view.overridden { "override" } else { "decision table" };
            println!(
                "{} {} ({} pattern, {})",
                "Strategy:".bold(),
                view.strategy.to_string().green(),
                view.pattern,
                origin
            );
            println!("{} {} bytes", "Estimated:".bold(), view.estimated_bytes);
            for adapter in &view.adapters {
                println!("  {}. {} [{}]", adapter.position + 1, adapter.adapter, adapter.kind);
            }
        }
    }
    Ok(())
}
