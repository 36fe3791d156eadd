//! Telemetry sinks.

use parking_lot::Mutex;
use tracing::info;

use loom_kernel::telemetry::{CompositionEvent, TelemetrySink};

/// Emits composition events as `tracing` events on target `loom::telemetry`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: &CompositionEvent) {
        let adapters = event
            .adapters_used
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        info!(
            target: "loom::telemetry",
            tenant = %event.tenant_id,
            fingerprint = %event.fingerprint,
            strategy = %event.strategy,
            adapters = %adapters,
            composition_time_ms = event.composition_time_ms,
            cache_hit = event.cache_hit,
            error = event.error.as_deref(),
            "composition"
        );
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn emit(&self, _event: &CompositionEvent) {}
}

/// Fans one event out to several sinks in order.
#[derive(Default)]
pub struct CompositeTelemetrySink {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl CompositeTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for CompositeTelemetrySink {
    fn emit(&self, event: &CompositionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Keeps the most recent events in memory, oldest dropped first.
#[derive(Debug)]
pub struct BufferedTelemetrySink {
    capacity: usize,
    events: Mutex<Vec<CompositionEvent>>,
}

impl BufferedTelemetrySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CompositionEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<CompositionEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TelemetrySink for BufferedTelemetrySink {
    fn emit(&self, event: &CompositionEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.remove(0);
        }
        events.push(event.clone());
    }
}
