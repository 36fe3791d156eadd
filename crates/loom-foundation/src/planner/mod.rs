//! Composition planning
//!
//! [`CompositionPlanner::plan`] is a pure function of a request and a
//! registry snapshot: the same inputs always yield the same plan and
//! fingerprint.
//!
//! Resolution order:
//!
//! 1. one retailer adapter serving `request.retailer`
//! 2. one brand adapter serving `request.brand`
//! 3. every task adapter whose id is the task or whose capability tags meet
//!    the task taxonomy, highest priority first, ties by id
//! 4. transitive dependencies, each placed before its first dependent
//! 5. strategy from the request override or the [`StrategyTable`]

pub mod strategy;
pub mod taxonomy;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use loom_kernel::adapter::{AdapterKind, AdapterRecord};
use loom_kernel::composition::{
    CompositionPattern, CompositionPlan, CompositionRequest, PlanningError,
};

use crate::registry::RegistrySnapshot;

pub use strategy::{GateWeighting, StrategyOverrides, StrategyTable};

/// How many adapters of each kind a plan may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindLimits {
    pub retailer: usize,
    pub brand: usize,
    /// `None` means unbounded
    pub task: Option<usize>,
}

impl Default for KindLimits {
    fn default() -> Self {
        Self {
            retailer: 1,
            brand: 1,
            task: None,
        }
    }
}

impl KindLimits {
    pub fn limit(&self, kind: AdapterKind) -> Option<usize> {
        match kind {
            AdapterKind::Retailer => Some(self.retailer),
            AdapterKind::Brand => Some(self.brand),
            AdapterKind::Task => self.task,
        }
    }
}

/// Turns requests into plans.
#[derive(Debug, Clone, Default)]
pub struct CompositionPlanner {
    table: StrategyTable,
    limits: KindLimits,
}

impl CompositionPlanner {
    pub fn new(table: StrategyTable, limits: KindLimits) -> Self {
        Self { table, limits }
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    pub fn plan(
        &self,
        request: &CompositionRequest,
        snapshot: &RegistrySnapshot,
    ) -> Result<CompositionPlan, PlanningError> {
        let base = request.base_model_id.as_str();
        let mut roots: Vec<Arc<AdapterRecord>> = Vec::new();

        for role in [AdapterKind::Retailer, AdapterKind::Brand] {
            match self.resolve_single(role, request, snapshot) {
                Some(record) => roots.push(record),
                None if request.is_optional(role) => {
                    debug!(role = %role, key = request.key_for(role), "optional role unresolved");
                }
                None => return Err(unresolved(role, request)),
            }
        }

        let tasks = self.resolve_tasks(request, snapshot);
        if tasks.is_empty() && !request.is_optional(AdapterKind::Task) {
            return Err(unresolved(AdapterKind::Task, request));
        }
        roots.extend(tasks);

        let adapters = expand_dependencies(&roots, snapshot, base)?;
        self.check_limits(&adapters)?;

        let pattern = classify(&roots, &adapters);
        let (strategy, overridden) = match request.strategy_override {
            Some(strategy) => (strategy, true),
            None => (self.table.strategy_for(pattern), false),
        };

        let plan = CompositionPlan::new(base, adapters, strategy, pattern, overridden);
        debug!(
            tenant = %request.tenant_id,
            adapters = ?plan.adapter_ids(),
            strategy = %plan.strategy,
            pattern = %plan.pattern,
            fingerprint = plan.fingerprint.short(),
            "plan resolved"
        );
        Ok(plan)
    }

    /// Highest-priority serving adapter for a single-valued role.
    fn resolve_single(
        &self,
        role: AdapterKind,
        request: &CompositionRequest,
        snapshot: &RegistrySnapshot,
    ) -> Option<Arc<AdapterRecord>> {
        let key = request.key_for(role);
        latest_per_id(snapshot, role, &request.base_model_id)
            .into_values()
            .filter(|r| r.serves(key))
            .min_by(|a, b| Reverse(a.priority).cmp(&Reverse(b.priority)).then(a.id.cmp(&b.id)))
    }

    fn resolve_tasks(
        &self,
        request: &CompositionRequest,
        snapshot: &RegistrySnapshot,
    ) -> Vec<Arc<AdapterRecord>> {
        let tags = taxonomy::expand(&request.task);
        let mut tasks: Vec<Arc<AdapterRecord>> =
            latest_per_id(snapshot, AdapterKind::Task, &request.base_model_id)
                .into_values()
                .filter(|r| r.id == request.task || r.has_any_capability(&tags))
                .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        if let Some(limit) = self.limits.task {
            tasks.truncate(limit);
        }
        tasks
    }

    fn check_limits(&self, adapters: &[Arc<AdapterRecord>]) -> Result<(), PlanningError> {
        for kind in AdapterKind::ALL {
            let Some(limit) = self.limits.limit(kind) else {
                continue;
            };
            let mut of_kind = adapters.iter().filter(|a| a.kind == kind);
            let Some(existing) = of_kind.next() else {
                continue;
            };
            if limit == 0 {
                return Err(PlanningError::KindConflict {
                    kind,
                    existing: existing.id.clone(),
                    incoming: existing.id.clone(),
                    limit,
                });
            }
            if let Some(incoming) = of_kind.nth(limit - 1) {
                return Err(PlanningError::KindConflict {
                    kind,
                    existing: existing.id.clone(),
                    incoming: incoming.id.clone(),
                    limit,
                });
            }
        }
        Ok(())
    }
}

fn unresolved(role: AdapterKind, request: &CompositionRequest) -> PlanningError {
    PlanningError::UnresolvedAdapter {
        role,
        key: request.key_for(role).to_string(),
        base_model_id: request.base_model_id.clone(),
    }
}

/// Highest active compatible version of each id of `kind`.
fn latest_per_id(
    snapshot: &RegistrySnapshot,
    kind: AdapterKind,
    base_model_id: &str,
) -> BTreeMap<String, Arc<AdapterRecord>> {
    let mut latest = BTreeMap::new();
    for record in snapshot.list_active(kind, base_model_id) {
        latest
            .entry(record.id.clone())
            .or_insert_with(|| Arc::clone(record));
    }
    latest
}

/// Roots plus their transitive dependencies, each dependency placed before
/// the first adapter that needs it.
fn expand_dependencies(
    roots: &[Arc<AdapterRecord>],
    snapshot: &RegistrySnapshot,
    base_model_id: &str,
) -> Result<Vec<Arc<AdapterRecord>>, PlanningError> {
    struct Walk<'a> {
        snapshot: &'a RegistrySnapshot,
        base_model_id: &'a str,
        placed: HashSet<String>,
        path: Vec<String>,
        order: Vec<Arc<AdapterRecord>>,
    }

    impl Walk<'_> {
        fn visit(&mut self, record: &Arc<AdapterRecord>) -> Result<(), PlanningError> {
            if self.placed.contains(&record.id) {
                return Ok(());
            }
            if let Some(start) = self.path.iter().position(|id| id == &record.id) {
                let mut cycle = self.path[start..].to_vec();
                cycle.push(record.id.clone());
                return Err(PlanningError::DependencyCycle { cycle });
            }

            self.path.push(record.id.clone());
            for dependency in &record.dependencies {
                let resolved = self
                    .snapshot
                    .resolve(dependency, self.base_model_id)
                    .cloned()
                    .ok_or_else(|| PlanningError::MissingDependency {
                        adapter: record.id.clone(),
                        dependency: dependency.clone(),
                        base_model_id: self.base_model_id.to_string(),
                    })?;
                self.visit(&resolved)?;
            }
            self.path.pop();

            self.placed.insert(record.id.clone());
            self.order.push(Arc::clone(record));
            Ok(())
        }
    }

    let mut walk = Walk {
        snapshot,
        base_model_id,
        placed: HashSet::new(),
        path: Vec::new(),
        order: Vec::new(),
    };
    for root in roots {
        walk.visit(root)?;
    }
    Ok(walk.order)
}

/// Multiplicity counts only the resolved candidates; adapters pulled in by
/// dependency expansion co-load as chained transforms.
fn classify(roots: &[Arc<AdapterRecord>], adapters: &[Arc<AdapterRecord>]) -> CompositionPattern {
    let competing = AdapterKind::ALL
        .iter()
        .any(|kind| roots.iter().filter(|a| a.kind == *kind).count() > 1);
    if competing {
        return CompositionPattern::Competing;
    }

    let ids: HashSet<&str> = adapters.iter().map(|a| a.id.as_str()).collect();
    let chained = adapters
        .iter()
        .any(|a| a.dependencies.iter().any(|d| ids.contains(d.as_str())));
    if chained {
        CompositionPattern::Chained
    } else {
        CompositionPattern::Disjoint
    }
}
