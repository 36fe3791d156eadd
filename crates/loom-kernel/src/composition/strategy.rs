//! Composition strategies and the kind patterns that select them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the deltas of a plan's adapters are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionStrategy {
    /// Independent deltas summed onto the base weights
    Additive,
    /// Competing deltas of one kind blended by gate weights
    Gated,
    /// Deltas applied one after another in plan order
    Sequential,
}

impl CompositionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Additive => "additive",
            Self::Gated => "gated",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for CompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompositionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "additive" => Ok(Self::Additive),
            "gated" => Ok(Self::Gated),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown composition strategy '{other}'")),
        }
    }
}

/// Shape of a resolved adapter set, the key of the strategy decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionPattern {
    /// More than one adapter of the same kind resolved
    Competing,
    /// At most one adapter per kind, and some adapter depends on another in the plan
    Chained,
    /// At most one adapter per kind, no dependency edges inside the plan
    Disjoint,
}

impl fmt::Display for CompositionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Competing => write!(f, "competing"),
            Self::Chained => write!(f, "chained"),
            Self::Disjoint => write!(f, "disjoint"),
        }
    }
}
