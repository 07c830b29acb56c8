//! Mirrors lifecycle events into the `tracing` log.

use orchestra_application::EventSink;
use orchestra_domain::{EventKind, OrchestrationEvent};
use tracing::{debug, info, warn};

/// Logs problems at warn, run and tool boundaries at info
/// and replica-level events at debug.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        let tool = event.tool.as_deref().unwrap_or("-");
        match event.kind {
            EventKind::Error | EventKind::Timeout | EventKind::Cancelled | EventKind::Warning => {
                warn!(
                    trace_id = %event.trace_id,
                    tool,
                    payload = %event.payload,
                    "{}",
                    event.kind
                );
            }
            EventKind::RunStarted
            | EventKind::RunCompleted
            | EventKind::ToolStarted
            | EventKind::BundleReady => {
                info!(
                    trace_id = %event.trace_id,
                    request_id = %event.request_id,
                    tool,
                    "{}",
                    event.kind
                );
            }
            EventKind::ReplicateStarted | EventKind::ReplicateDone | EventKind::PartialSummary => {
                debug!(
                    trace_id = %event.trace_id,
                    tool,
                    payload = %event.payload,
                    "{}",
                    event.kind
                );
            }
        }
    }
}
