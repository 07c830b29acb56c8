//! Errors surfaced by the orchestrator

use crate::registry::RegistryError;
use orchestra_domain::{BudgetViolation, ErrorCode, ToolError, ToolErrorKind};
use thiserror::Error;

/// Errors that can end `Orchestrator::run` without an output
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("No viable tool: {reason}")]
    NoViableTool { reason: String },

    #[error("Tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(#[from] BudgetViolation),

    #[error("Idempotency key '{key}' was used with a different payload")]
    Conflict { key: String },

    #[error("Idempotency key '{key}' is already being processed")]
    InProgress { key: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Caller-visible error code
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            OrchestratorError::Conflict { .. } | OrchestratorError::InProgress { .. } => {
                ErrorCode::Conflict
            }
            OrchestratorError::ToolExecution { source, .. } => ErrorCode::for_tool_error(source),
            OrchestratorError::NoViableTool { .. } | OrchestratorError::Cancelled => {
                ErrorCode::AgentFailed
            }
            OrchestratorError::InvalidRequest(_)
            | OrchestratorError::NotFound(_)
            | OrchestratorError::DuplicateTool(_) => ErrorCode::UnknownError,
        }
    }

    /// Check if this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            OrchestratorError::Cancelled => true,
            OrchestratorError::ToolExecution { source, .. } => {
                source.kind == ToolErrorKind::Cancelled
            }
            _ => false,
        }
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::DuplicateTool(name) => OrchestratorError::DuplicateTool(name),
            RegistryError::NotFound(name) => OrchestratorError::NotFound(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_domain::{Budget, Usage};

    #[test]
    fn test_codes() {
        let violation = Budget::tokens(100).check(&Usage::tokens(150)).unwrap_err();
        assert_eq!(
            OrchestratorError::from(violation).code(),
            ErrorCode::BudgetExceeded
        );
        assert_eq!(
            OrchestratorError::Conflict { key: "k".into() }.code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            OrchestratorError::ToolExecution {
                tool: "t".into(),
                source: ToolError::timeout("run"),
            }
            .code(),
            ErrorCode::Timeout
        );
    }

    #[test]
    fn test_from_registry_error() {
        let err: OrchestratorError = RegistryError::NotFound("ghost".into()).into();
        assert_eq!(err, OrchestratorError::NotFound("ghost".into()));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_budget_message_names_limit_and_actual() {
        let violation = Budget::tokens(100).check(&Usage::tokens(150)).unwrap_err();
        let msg = OrchestratorError::from(violation).to_string();
        assert!(msg.contains("limit=100"));
        assert!(msg.contains("actual=150"));
    }
}
