//! Error classification.
//!
//! Maps a [`ToolError`] to a fixed [`ErrorCategory`] and a retry verdict
//! using a layered strategy:
//!
//! 1. A backend-supplied category hint wins outright.
//! 2. Error kinds with a fixed meaning (timeout, cancellation, invalid input,
//!    budget, open circuit) map directly.
//! 3. The message is matched case-insensitively against a configurable
//!    category → substring table, first category in table order wins.
//! 4. Anything left is `Unknown` and is retried only if the caller flagged
//!    the error as retryable.

use crate::core::error::{ToolError, ToolErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    Network,
    Server,
    Authentication,
    InvalidRequest,
    BudgetExceeded,
    Conflict,
    CircuitOpen,
    Cancelled,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Server => "server",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::BudgetExceeded => "budget_exceeded",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether errors of this category are retried by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::Timeout
                | ErrorCategory::Network
                | ErrorCategory::Server
        )
    }

    /// Categories that are never retried, whatever the caller says
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorCategory::BudgetExceeded
                | ErrorCategory::Conflict
                | ErrorCategory::CircuitOpen
                | ErrorCategory::Cancelled
        )
    }

    /// Whether a failure of this category says something about backend health
    /// and should be recorded by a circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::Timeout
                | ErrorCategory::Network
                | ErrorCategory::Server
                | ErrorCategory::Unknown
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rate_limit" | "ratelimit" => Ok(ErrorCategory::RateLimit),
            "timeout" => Ok(ErrorCategory::Timeout),
            "network" => Ok(ErrorCategory::Network),
            "server" => Ok(ErrorCategory::Server),
            "authentication" | "auth" => Ok(ErrorCategory::Authentication),
            "invalid_request" => Ok(ErrorCategory::InvalidRequest),
            "budget_exceeded" => Ok(ErrorCategory::BudgetExceeded),
            "conflict" => Ok(ErrorCategory::Conflict),
            "circuit_open" => Ok(ErrorCategory::CircuitOpen),
            "cancelled" => Ok(ErrorCategory::Cancelled),
            "unknown" => Ok(ErrorCategory::Unknown),
            other => Err(format!("Unknown error category: {}", other)),
        }
    }
}

/// Verdict produced by [`ErrorClassifier::classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

/// Layered error classifier with a configurable message-pattern table
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<(ErrorCategory, Vec<String>)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Self::default_patterns())
    }
}

impl ErrorClassifier {
    pub fn new(patterns: Vec<(ErrorCategory, Vec<String>)>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|(category, needles)| {
                (
                    category,
                    needles.into_iter().map(|n| n.to_lowercase()).collect(),
                )
            })
            .collect();
        Self { patterns }
    }

    /// Built-in pattern table, checked in this order.
    pub fn default_patterns() -> Vec<(ErrorCategory, Vec<String>)> {
        let table: [(ErrorCategory, &[&str]); 6] = [
            (
                ErrorCategory::RateLimit,
                &["rate limit", "rate-limit", "throttled", "quota exceeded", "too many requests", "429"],
            ),
            (
                ErrorCategory::Timeout,
                &["timed out", "timeout", "deadline exceeded"],
            ),
            (
                ErrorCategory::Network,
                &["connection reset", "connection refused", "network", "dns", "broken pipe", "transport closed"],
            ),
            (
                ErrorCategory::Server,
                &["internal server error", "service unavailable", "bad gateway", "overloaded", "500", "502", "503", "504"],
            ),
            (
                ErrorCategory::Authentication,
                &["unauthorized", "forbidden", "invalid api key", "authentication", "401", "403"],
            ),
            (
                ErrorCategory::InvalidRequest,
                &["invalid request", "bad request", "malformed", "400"],
            ),
        ];

        table
            .into_iter()
            .map(|(category, needles)| (category, needles.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    /// Add substrings for a category, appending the category if absent.
    pub fn with_patterns(mut self, category: ErrorCategory, needles: &[&str]) -> Self {
        let needles = needles.iter().map(|n| n.to_lowercase());
        match self.patterns.iter_mut().find(|(c, _)| *c == category) {
            Some((_, existing)) => existing.extend(needles),
            None => self.patterns.push((category, needles.collect())),
        }
        self
    }

    pub fn classify(&self, error: &ToolError) -> Classification {
        let retry_after = error.retry_after();

        if let Some(category) = error.category_hint {
            return Self::verdict(category, error, retry_after);
        }

        let by_kind = match error.kind {
            ToolErrorKind::Timeout => Some(ErrorCategory::Timeout),
            ToolErrorKind::Cancelled => Some(ErrorCategory::Cancelled),
            ToolErrorKind::InvalidInput | ToolErrorKind::Unsupported => {
                Some(ErrorCategory::InvalidRequest)
            }
            ToolErrorKind::BudgetExceeded => Some(ErrorCategory::BudgetExceeded),
            ToolErrorKind::CircuitOpen => Some(ErrorCategory::CircuitOpen),
            ToolErrorKind::Backend | ToolErrorKind::NoValidReplicates | ToolErrorKind::Other => None,
        };
        if let Some(category) = by_kind {
            return Self::verdict(category, error, retry_after);
        }

        let haystack = match &error.code {
            Some(code) => format!("{} {}", error.message, code).to_lowercase(),
            None => error.message.to_lowercase(),
        };
        let matched = self.patterns.iter().find_map(|(category, needles)| {
            needles
                .iter()
                .any(|n| haystack.contains(n.as_str()))
                .then_some(*category)
        });

        match matched {
            Some(category) => Self::verdict(category, error, retry_after),
            None => Classification {
                category: ErrorCategory::Unknown,
                retryable: error.retryable.unwrap_or(false),
                retry_after,
            },
        }
    }

    fn verdict(
        category: ErrorCategory,
        error: &ToolError,
        retry_after: Option<Duration>,
    ) -> Classification {
        let retryable = if category.is_terminal() {
            false
        } else {
            error.retryable.unwrap_or_else(|| category.is_retryable())
        };
        Classification {
            category,
            retryable,
            retry_after,
        }
    }
}
