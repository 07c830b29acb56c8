//! Orchestrator behavior from TOML (`[orchestration]` section)

use orchestra_application::BudgetEnforcement;
use serde::{Deserialize, Serialize};

/// Raw orchestration configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOrchestrationConfig {
    /// Idempotency conflicts are returned as errors
    pub strict_conflict: bool,
    /// Budget overruns are returned as errors
    pub strict_budget: bool,
    /// `post_hoc` or `preemptive`
    pub budget_enforcement: String,
    pub default_timeout_ms: Option<u64>,
    /// Use the reliable orchestrator (retries, breakers, idempotency)
    pub reliable: bool,
}

impl Default for FileOrchestrationConfig {
    fn default() -> Self {
        Self {
            strict_conflict: true,
            strict_budget: false,
            budget_enforcement: BudgetEnforcement::default().as_str().to_string(),
            default_timeout_ms: None,
            reliable: true,
        }
    }
}

impl FileOrchestrationConfig {
    pub fn parse_budget_enforcement(&self) -> Result<BudgetEnforcement, String> {
        self.budget_enforcement.parse()
    }
}
