//! Tool-level error value.
//!
//! [`ToolError`] is what a tool (or a single replica) reports when it fails.
//! It is a plain value so it can cross task boundaries, be recorded in a
//! replicate's quality, and be classified by the reliability layer.
//!
//! | Kind | Typical source | Default classification |
//! |------|----------------|------------------------|
//! | `Backend` | generation backend call | by hint, then by message |
//! | `Timeout` | deadline hit | timeout, retryable |
//! | `Cancelled` | cooperative cancellation | cancelled, not retryable |
//! | `InvalidInput` | bad request/options | invalid_request, not retryable |
//! | `BudgetExceeded` | resource ceiling | budget, not retryable |
//! | `CircuitOpen` | breaker rejected the call | circuit_open, not retryable |
//! | `NoValidReplicates` | bundle produced nothing usable | by message |
//! | `Unsupported` | capability missing | invalid_request, not retryable |
//! | `Other` | anything else | by message |

use crate::reliability::classify::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broad origin of a tool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Backend,
    Timeout,
    Cancelled,
    InvalidInput,
    BudgetExceeded,
    CircuitOpen,
    NoValidReplicates,
    Unsupported,
    Other,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ToolErrorKind::Backend => "backend",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Cancelled => "cancelled",
            ToolErrorKind::InvalidInput => "invalid_input",
            ToolErrorKind::BudgetExceeded => "budget_exceeded",
            ToolErrorKind::CircuitOpen => "circuit_open",
            ToolErrorKind::NoValidReplicates => "no_valid_replicates",
            ToolErrorKind::Unsupported => "unsupported",
            ToolErrorKind::Other => "other",
        }
    }
}

/// Error reported by a tool or replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Backend-supplied category; takes precedence during classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<ErrorCategory>,
    /// Caller's explicit retryability verdict for otherwise generic errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Provider-declared minimum wait before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Backend-specific code (e.g. an HTTP status)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Number of attempts made before this error was surfaced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            category_hint: None,
            retryable: None,
            retry_after_ms: None,
            code: None,
            attempts: None,
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Backend, message)
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("Operation timed out: {}", operation.into()),
        )
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::Cancelled,
            format!("Operation cancelled: {}", operation.into()),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidInput, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::BudgetExceeded, message)
    }

    pub fn circuit_open(key: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::CircuitOpen,
            format!("Circuit open for '{}'", key.into()),
        )
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Unsupported, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Other, message)
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category_hint = Some(category);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ToolErrorKind::Cancelled
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if let Some(attempts) = self.attempts {
            write!(f, " (after {} attempts)", attempts)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolError {}
