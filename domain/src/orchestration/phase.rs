//! Per-run lifecycle
//!
//! ```text
//! Pending ──▶ Planning ──▶ Executing ──▶ Aggregating ──▶ Completed
//!    │                        │                              ▲
//!    │                        └──────────────────────────────┘
//!    └──▶ Completed (idempotent replay)
//!
//! any non-terminal phase ──▶ Failed
//! ```
//!
//! `Planning` is skipped when the caller names a tool and `Aggregating` only
//! happens for bundle tools. Fallback attempts stay in `Executing`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Planning,
    Executing,
    Aggregating,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Planning => "planning",
            RunPhase::Executing => "executing",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Pending, Planning | Executing | Completed) => true,
            (Planning, Executing) => true,
            (Executing, Executing | Aggregating | Completed) => true,
            (Aggregating, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracks the phase of one run and the path it took
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Pending,
            history: vec![RunPhase::Pending],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: RunPhase) -> Result<(), String> {
        if !self.phase.can_transition_to(next) {
            return Err(format!("invalid run transition {} -> {}", self.phase, next));
        }
        if self.phase != next {
            self.history.push(next);
        }
        self.phase = next;
        Ok(())
    }
}
