//! Normalized orchestration result

use crate::bundle::entities::EvidenceBundle;
use crate::core::error::{ToolError, ToolErrorKind};
use crate::core::usage::Usage;
use crate::reliability::circuit::CircuitState;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed vocabulary of error codes visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    AgentFailed,
    BudgetExceeded,
    Conflict,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::AgentFailed => "AGENT_FAILED",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn for_tool_error(error: &ToolError) -> Self {
        match error.kind {
            ToolErrorKind::Timeout => ErrorCode::Timeout,
            ToolErrorKind::BudgetExceeded => ErrorCode::BudgetExceeded,
            ToolErrorKind::Other => ErrorCode::UnknownError,
            _ => ErrorCode::AgentFailed,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error entry of [`OrchestrationOutput::errors`], keyed by tool name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorReport {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub is_retryable: bool,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolErrorReport {
    pub fn from_tool_error(error: &ToolError, is_retryable: bool) -> Self {
        let mut details = serde_json::Map::new();
        if let Some(attempts) = error.attempts {
            details.insert("attempts".into(), json!(attempts));
        }
        if let Some(code) = &error.code {
            details.insert("backend_code".into(), json!(code));
        }
        if let Some(category) = error.category_hint {
            details.insert("category".into(), json!(category.as_str()));
        }
        Self {
            error_type: error.kind.as_str().to_string(),
            message: error.message.clone(),
            is_retryable,
            code: ErrorCode::for_tool_error(error),
            details: (!details.is_empty()).then_some(Value::Object(details)),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Compact description of an Evidence Bundle for run metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDigest {
    pub task_id: String,
    pub k: usize,
    pub launched: usize,
    pub completed: usize,
    pub valid: usize,
    pub early_stopped: bool,
    pub confidence: f64,
    pub insufficient_evidence: bool,
}

impl From<&EvidenceBundle> for BundleDigest {
    fn from(bundle: &EvidenceBundle) -> Self {
        Self {
            task_id: bundle.meta.task_id.clone(),
            k: bundle.meta.k,
            launched: bundle.meta.launched,
            completed: bundle.meta.completed,
            valid: bundle.valid_count(),
            early_stopped: bundle.meta.early_stopped,
            confidence: bundle.summary.confidence,
            insufficient_evidence: bundle.summary.insufficient_evidence,
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputMetadata {
    /// Tool that produced the content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    /// Attempts beyond the first, summed over every tool tried
    pub retry_count: u32,
    /// Breaker state per key as observed during the run
    pub circuit_states: BTreeMap<String, CircuitState>,
    /// Planning rule that selected the tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Tools attempted before the one that succeeded (or all, on failure)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks_tried: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleDigest>,
    /// Served from the idempotency store
    pub idempotent_replay: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Normalized result returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationOutput {
    pub content: Value,
    pub usage: Usage,
    pub metadata: OutputMetadata,
    pub trace_id: String,
    pub request_id: String,
    pub elapsed_ms: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, ToolErrorReport>,
}

impl OrchestrationOutput {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// The Evidence Bundle carried as content, for bundle tools.
    pub fn evidence(&self) -> Option<EvidenceBundle> {
        self.metadata.bundle.as_ref()?;
        serde_json::from_value(self.content.clone()).ok()
    }
}
