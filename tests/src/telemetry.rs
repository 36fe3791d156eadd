use std::sync::Arc;

use loom_kernel::telemetry::{CompositionEvent, TelemetrySink};
use parking_lot::Mutex;

/// Records every composition event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingTelemetrySink {
    events: Arc<Mutex<Vec<CompositionEvent>>>,
}

impl RecordingTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CompositionEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn cache_hits(&self) -> usize {
        self.events.lock().iter().filter(|e| e.cache_hit).count()
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn emit(&self, event: &CompositionEvent) {
        self.events.lock().push(event.clone());
    }
}
