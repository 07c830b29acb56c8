//! Port for lifecycle event delivery.
//!
//! Defines the [`EventSink`] trait that receives [`OrchestrationEvent`]s, plus
//! the [`EventEmitter`] handle tools and the engine use to produce them.
//!
//! This is separate from `tracing`-based operation logs: tracing carries
//! human-readable diagnostics, while events are the machine-readable run
//! transcript (JSONL files, streaming to a caller, test assertions).

use orchestra_domain::{EventKind, OrchestrationEvent};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Receives lifecycle events.
///
/// `emit` is synchronous and non-fallible so event delivery can never disturb
/// a run; sinks swallow their own I/O errors.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OrchestrationEvent);
}

/// No-op sink for when nobody is listening
pub struct NoEventSink;

impl EventSink for NoEventSink {
    fn emit(&self, _event: OrchestrationEvent) {}
}

/// Keeps every event in memory, mostly for tests and `--json` output
#[derive(Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<OrchestrationEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards every event to several sinks
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for CompositeEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Scrubs an event payload before it leaves the process
pub trait Redactor: Send + Sync {
    fn redact(&self, payload: &mut Value);
}

/// Applies a [`Redactor`] to every payload, then forwards to the inner sink
pub struct RedactingEventSink {
    inner: Arc<dyn EventSink>,
    redactor: Arc<dyn Redactor>,
}

impl RedactingEventSink {
    pub fn new(inner: Arc<dyn EventSink>, redactor: Arc<dyn Redactor>) -> Self {
        Self { inner, redactor }
    }
}

impl EventSink for RedactingEventSink {
    fn emit(&self, mut event: OrchestrationEvent) {
        self.redactor.redact(&mut event.payload);
        self.inner.emit(event);
    }
}

/// Handle that stamps events with the run's ids and, optionally, a tool name.
///
/// Cheap to clone; replica tasks each hold one.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    trace_id: Arc<str>,
    request_id: Arc<str>,
    tool: Option<Arc<str>>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>, trace_id: &str, request_id: &str) -> Self {
        Self {
            sink,
            trace_id: Arc::from(trace_id),
            request_id: Arc::from(request_id),
            tool: None,
        }
    }

    /// Emitter that discards everything
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoEventSink), "", "")
    }

    /// Same run, events attributed to `tool`
    pub fn for_tool(&self, tool: &str) -> Self {
        Self {
            tool: Some(Arc::from(tool)),
            ..self.clone()
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    pub fn emit(&self, kind: EventKind, payload: Value) {
        let mut event = OrchestrationEvent::new(kind, &*self.trace_id, &*self.request_id)
            .with_payload(payload);
        if let Some(tool) = &self.tool {
            event = event.with_tool(&**tool);
        }
        self.sink.emit(event);
    }
}
