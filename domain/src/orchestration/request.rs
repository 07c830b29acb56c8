//! Inbound orchestration request

use crate::bundle::options::BundleOptions;
use crate::core::usage::Budget;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest accepted trace/request id
pub const MAX_ID_LEN: usize = 128;

/// Per-call configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    /// Wall-clock limit for the whole run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether the caller consumes intermediate events
    pub streaming: bool,
}

impl OrchestrationConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Everything `Orchestrator::run` needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub payload: Value,
    /// Explicit tool; the planner chooses when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub tool_options: Value,
    /// Overrides the default bundle options for bundle tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_options: Option<BundleOptions>,
    #[serde(default)]
    pub config: OrchestrationConfig,
}

impl OrchestrationRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn with_tool_options(mut self, options: Value) -> Self {
        self.tool_options = options;
        self
    }

    pub fn with_bundle_options(mut self, options: BundleOptions) -> Self {
        self.bundle_options = Some(options);
        self
    }

    pub fn with_config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }
}

/// Check a caller-supplied trace or request id.
///
/// Ids must be non-empty, at most [`MAX_ID_LEN`] bytes, and use only ASCII
/// alphanumerics plus `-`, `_`, `.` and `:`.
pub fn validate_id(label: &str, id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} must not be empty", label));
    }
    if id.len() > MAX_ID_LEN {
        return Err(format!("{} exceeds {} characters", label, MAX_ID_LEN));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(format!("{} contains invalid character {:?}", label, bad));
    }
    Ok(())
}
