//! Strategy decision table and gate weighting.

use std::fmt;

use serde::{Deserialize, Serialize};

use loom_kernel::adapter::AdapterRecord;
use loom_kernel::composition::{CompositionPattern, CompositionStrategy};

/// Per-pattern overrides read from configuration. Unset rows keep the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOverrides {
    pub competing: Option<CompositionStrategy>,
    pub chained: Option<CompositionStrategy>,
    pub disjoint: Option<CompositionStrategy>,
}

/// Maps the pattern of a resolved adapter set to a composition strategy.
///
/// | pattern   | shape                                       | default    |
/// |-----------|---------------------------------------------|------------|
/// | competing | more than one resolved candidate of a kind  | gated      |
/// | chained   | some adapter in the plan depends on another | sequential |
/// | disjoint  | one candidate per kind, no dependency edges | additive   |
///
/// Patterns are checked in that order, so a set that both competes and
/// chains is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyTable {
    competing: CompositionStrategy,
    chained: CompositionStrategy,
    disjoint: CompositionStrategy,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            competing: CompositionStrategy::Gated,
            chained: CompositionStrategy::Sequential,
            disjoint: CompositionStrategy::Additive,
        }
    }
}

impl StrategyTable {
    pub fn with_overrides(overrides: &StrategyOverrides) -> Self {
        let defaults = Self::default();
        Self {
            competing: overrides.competing.unwrap_or(defaults.competing),
            chained: overrides.chained.unwrap_or(defaults.chained),
            disjoint: overrides.disjoint.unwrap_or(defaults.disjoint),
        }
    }

    pub fn strategy_for(&self, pattern: CompositionPattern) -> CompositionStrategy {
        match pattern {
            CompositionPattern::Competing => self.competing,
            CompositionPattern::Chained => self.chained,
            CompositionPattern::Disjoint => self.disjoint,
        }
    }

    /// Rows in evaluation order.
    pub fn rows(&self) -> [(CompositionPattern, CompositionStrategy); 3] {
        [
            (CompositionPattern::Competing, self.competing),
            (CompositionPattern::Chained, self.chained),
            (CompositionPattern::Disjoint, self.disjoint),
        ]
    }
}

/// How gate weights are assigned to competing adapters of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateWeighting {
    /// Every competitor gets the same share
    #[default]
    Uniform,
    /// Shares grow with declared priority; the lowest priority still gets a share
    Priority,
}

impl GateWeighting {
    /// Gate weights for `group`, in the group's order. Always sums to 1.
    pub fn weights(&self, group: &[&AdapterRecord]) -> Vec<f32> {
        if group.is_empty() {
            return Vec::new();
        }
        let raw: Vec<f64> = match self {
            Self::Uniform => vec![1.0; group.len()],
            Self::Priority => {
                let floor = group.iter().map(|a| a.priority).min().unwrap_or(0) as i64;
                group
                    .iter()
                    .map(|a| (a.priority as i64 - floor + 1) as f64)
                    .collect()
            }
        };
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|w| (w / total) as f32).collect()
    }
}

impl fmt::Display for GateWeighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::Priority => write!(f, "priority"),
        }
    }
}
