//! Lifecycle events
//!
//! Every event carries the tool it concerns (when there is one), the run's
//! trace and request ids, and a kind-specific JSON payload.
//!
//! | Kind | Emitted when |
//! |------|--------------|
//! | `run_started` | the orchestrator accepted a request |
//! | `tool_started` | a tool is about to be executed |
//! | `replicate_started` / `replicate_done` | a bundle replica starts / is recorded |
//! | `partial_summary` | once, after the first two replicas |
//! | `bundle_ready` | the Evidence Bundle has been aggregated |
//! | `warning` | something degraded but the run continues |
//! | `error` | a tool attempt failed |
//! | `timeout` / `cancelled` | a deadline hit / cancellation observed |
//! | `run_completed` | the run finished, successfully or not |

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    ToolStarted,
    ReplicateStarted,
    ReplicateDone,
    PartialSummary,
    BundleReady,
    Warning,
    Error,
    Timeout,
    Cancelled,
    RunCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::RunStarted => "run_started",
            EventKind::ToolStarted => "tool_started",
            EventKind::ReplicateStarted => "replicate_started",
            EventKind::ReplicateDone => "replicate_done",
            EventKind::PartialSummary => "partial_summary",
            EventKind::BundleReady => "bundle_ready",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
            EventKind::Timeout => "timeout",
            EventKind::Cancelled => "cancelled",
            EventKind::RunCompleted => "run_completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub trace_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl OrchestrationEvent {
    pub fn new(
        kind: EventKind,
        trace_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            tool: None,
            trace_id: trace_id.into(),
            request_id: request_id.into(),
            payload: Value::Null,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = OrchestrationEvent::new(EventKind::PartialSummary, "t-1", "r-1")
            .with_tool("echo3")
            .with_payload(json!({"distance": 0.1}));
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["kind"], json!("partial_summary"));
        assert_eq!(v["tool"], json!("echo3"));
        assert_eq!(v["payload"]["distance"], json!(0.1));
    }

    #[test]
    fn test_null_payload_and_tool_omitted() {
        let v = serde_json::to_value(OrchestrationEvent::new(EventKind::RunStarted, "t", "r"))
            .unwrap();
        assert!(v.get("payload").is_none());
        assert!(v.get("tool").is_none());
    }
}
