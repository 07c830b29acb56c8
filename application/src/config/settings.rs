//! Orchestrator settings: use case behavior control.
//!
//! [`OrchestratorSettings`] groups the static knobs that shape how
//! [`Orchestrator`](crate::use_cases::orchestrate::Orchestrator) treats
//! conflicts, budgets and bundle defaults. Per-call values in
//! `OrchestrationConfig` take precedence where both exist.

use orchestra_domain::BundleOptions;
use serde::{Deserialize, Serialize};

/// When the run budget is enforced.
///
/// | Mode | Behavior |
/// |------|----------|
/// | `post_hoc` | usage is compared with the budget after the run |
/// | `preemptive` | bundle replicas are refused once the budget is spent, and each replica gets an even share |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetEnforcement {
    #[default]
    PostHoc,
    Preemptive,
}

impl BudgetEnforcement {
    pub fn as_str(&self) -> &str {
        match self {
            BudgetEnforcement::PostHoc => "post_hoc",
            BudgetEnforcement::Preemptive => "preemptive",
        }
    }
}

impl std::fmt::Display for BudgetEnforcement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BudgetEnforcement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "post_hoc" | "posthoc" => Ok(BudgetEnforcement::PostHoc),
            "preemptive" => Ok(BudgetEnforcement::Preemptive),
            other => Err(format!("Unknown budget enforcement: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Idempotency conflicts surface as errors instead of failed outputs
    pub strict_conflict: bool,
    /// Budget overruns surface as errors instead of failed outputs
    pub strict_budget: bool,
    pub budget_enforcement: BudgetEnforcement,
    /// Bundle options used when a request does not carry its own
    pub default_bundle: BundleOptions,
    /// Run timeout used when a request does not set one
    pub default_timeout_ms: Option<u64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            strict_conflict: true,
            strict_budget: false,
            budget_enforcement: BudgetEnforcement::PostHoc,
            default_bundle: BundleOptions::default(),
            default_timeout_ms: None,
        }
    }
}

impl OrchestratorSettings {
    // ==================== Builder Methods ====================

    pub fn with_strict_conflict(mut self, strict: bool) -> Self {
        self.strict_conflict = strict;
        self
    }

    pub fn with_strict_budget(mut self, strict: bool) -> Self {
        self.strict_budget = strict;
        self
    }

    pub fn with_budget_enforcement(mut self, mode: BudgetEnforcement) -> Self {
        self.budget_enforcement = mode;
        self
    }

    pub fn with_default_bundle(mut self, options: BundleOptions) -> Self {
        self.default_bundle = options;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}
