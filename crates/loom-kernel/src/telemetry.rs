//! Composition events.

use serde::Serialize;

use crate::adapter::AdapterRef;
use crate::composition::{CompositionStrategy, Fingerprint};

/// Emitted once per inference that got past planning, whether it succeeded
/// or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionEvent {
    pub tenant_id: String,
    pub fingerprint: Fingerprint,
    pub strategy: CompositionStrategy,
    /// Adapters applied, or planned when the call failed
    pub adapters_used: Vec<AdapterRef>,
    pub composition_time_ms: u64,
    pub cache_hit: bool,
    /// Set when the call failed after planning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompositionEvent {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives composition events. Must not block the request path.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &CompositionEvent);
}
