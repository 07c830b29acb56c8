//! Event sinks for lifecycle events.
//!
//! - [`JsonlEventSink`] appends one JSON object per event to a file
//! - [`TracingEventSink`] mirrors events into the `tracing` log
//!
//! Both implement the [`EventSink`](orchestra_application::EventSink) port.

mod jsonl_sink;
mod tracing_sink;

pub use jsonl_sink::JsonlEventSink;
pub use tracing_sink::TracingEventSink;
