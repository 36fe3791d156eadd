//! The per-call composition request.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::strategy::CompositionStrategy;
use crate::adapter::AdapterKind;

/// Context of a single inference call. Ephemeral, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionRequest {
    pub tenant_id: String,
    /// Retailer key; matched exactly against adapter targets
    pub retailer: String,
    /// Brand key; matched exactly against adapter targets
    pub brand: String,
    /// Requested task, possibly dotted (`bidding.keyword`)
    pub task: String,
    pub base_model_id: String,
    #[serde(default)]
    pub strategy_override: Option<CompositionStrategy>,
    /// Roles that may be left unresolved without failing the plan
    #[serde(default)]
    pub optional_roles: BTreeSet<AdapterKind>,
}

impl CompositionRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        retailer: impl Into<String>,
        brand: impl Into<String>,
        task: impl Into<String>,
        base_model_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            retailer: retailer.into(),
            brand: brand.into(),
            task: task.into(),
            base_model_id: base_model_id.into(),
            strategy_override: None,
            optional_roles: BTreeSet::new(),
        }
    }

    pub fn with_strategy_override(mut self, strategy: CompositionStrategy) -> Self {
        self.strategy_override = Some(strategy);
        self
    }

    /// Declare a role optional: an unresolved adapter for it is skipped.
    pub fn with_optional_role(mut self, role: AdapterKind) -> Self {
        self.optional_roles.insert(role);
        self
    }

    pub fn is_optional(&self, role: AdapterKind) -> bool {
        self.optional_roles.contains(&role)
    }

    /// The request key the planner resolves for `role`.
    pub fn key_for(&self, role: AdapterKind) -> &str {
        match role {
            AdapterKind::Retailer => &self.retailer,
            AdapterKind::Brand => &self.brand,
            AdapterKind::Task => &self.task,
        }
    }
}
