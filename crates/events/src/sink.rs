//! Event sink trait and simple implementations.

use std::sync::{Arc, Mutex};

use dcluster_core::Identity;

use crate::event::{EventType, ReconcileEvent};

/// Fire-and-forget destination for reconcile events.
///
/// `emit` has no error channel: an event that cannot be delivered is
/// dropped and the caller carries on.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn emit(&self, event: ReconcileEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: ReconcileEvent) {
        (**self).emit(event);
    }
}

/// Keeps every event in memory. Used by tests.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<ReconcileEvent>>,
}

impl InMemoryEventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty sink wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<ReconcileEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events for one identity, in emission order.
    pub fn events_for(&self, identity: &Identity) -> Vec<ReconcileEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.identity == identity)
            .collect()
    }

    /// Reasons of all events, in emission order.
    pub fn reasons(&self) -> Vec<&'static str> {
        self.events().iter().map(ReconcileEvent::reason).collect()
    }

    /// Number of events emitted.
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    /// Whether nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: ReconcileEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ReconcileEvent) {
        match event.event_type() {
            EventType::Normal => tracing::info!(
                identity = %event.identity,
                reason = event.reason(),
                event_id = %event.event_id,
                "{}",
                event.message()
            ),
            EventType::Warning => tracing::warn!(
                identity = %event.identity,
                reason = event.reason(),
                event_id = %event.event_id,
                "{}",
                event.message()
            ),
        }
    }
}

/// Forwards every event to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a destination.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of destinations.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no destinations.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: ReconcileEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
