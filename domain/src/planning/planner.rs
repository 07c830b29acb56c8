//! Rule-based planner
//!
//! Pure: [`Planner::plan`] looks at a [`PlanRequest`] snapshot (payload,
//! budget, catalog, circuit states) and returns a [`PlanDecision`]. It never
//! executes anything and never fails; "nothing is runnable" is an explicit
//! [`PlanDecision::NoViableTool`] value carrying the rejections.

use super::rule::PlanRule;
use crate::core::usage::{Budget, BudgetResource};
use crate::reliability::circuit::CircuitState;
use crate::tool::metadata::ToolMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inputs the planner decides on
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub payload: Value,
    pub budget: Option<Budget>,
    /// Registered tools
    pub catalog: Vec<ToolMetadata>,
    /// Circuit state observed per tool name; missing means closed
    pub circuit_states: HashMap<String, CircuitState>,
}

impl PlanRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn with_budget(mut self, budget: Option<Budget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<ToolMetadata>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_circuit_state(mut self, tool: impl Into<String>, state: CircuitState) -> Self {
        self.circuit_states.insert(tool.into(), state);
        self
    }

    fn metadata(&self, tool: &str) -> Option<&ToolMetadata> {
        self.catalog.iter().find(|m| m.name == tool)
    }

    /// Why `tool` cannot be selected, if it cannot.
    fn unselectable(&self, tool: &str) -> Option<RejectionReason> {
        let Some(meta) = self.metadata(tool) else {
            return Some(RejectionReason::NotRegistered);
        };
        if self
            .circuit_states
            .get(tool)
            .is_some_and(|state| state.is_open())
        {
            return Some(RejectionReason::CircuitOpen);
        }
        if let Some(budget) = &self.budget
            && let Some(resource) = meta.estimates.exceeds(budget)
        {
            return Some(RejectionReason::OverBudget { resource });
        }
        None
    }
}

/// Why a candidate tool was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    NotRegistered,
    CircuitOpen,
    OverBudget { resource: BudgetResource },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NotRegistered => write!(f, "not registered"),
            RejectionReason::CircuitOpen => write!(f, "circuit open"),
            RejectionReason::OverBudget { resource } => {
                write!(f, "estimated {} exceeds budget", resource)
            }
        }
    }
}

/// A candidate the planner looked at and skipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub tool: String,
    /// Rule that proposed it; `None` for the default tool
    pub rule: Option<String>,
    pub reason: RejectionReason,
}

/// Outcome of planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PlanDecision {
    Selected {
        tool: String,
        options: Value,
        /// Viable fallbacks, in the order they should be tried
        fallbacks: Vec<String>,
        rule: Option<String>,
        rejected: Vec<RejectedCandidate>,
    },
    NoViableTool {
        reason: String,
        rejected: Vec<RejectedCandidate>,
    },
}

impl PlanDecision {
    pub fn is_selected(&self) -> bool {
        matches!(self, PlanDecision::Selected { .. })
    }

    pub fn tool(&self) -> Option<&str> {
        match self {
            PlanDecision::Selected { tool, .. } => Some(tool),
            PlanDecision::NoViableTool { .. } => None,
        }
    }

    pub fn rejected(&self) -> &[RejectedCandidate] {
        match self {
            PlanDecision::Selected { rejected, .. } | PlanDecision::NoViableTool { rejected, .. } => {
                rejected
            }
        }
    }
}

/// Ordered rule set plus an optional catch-all tool
#[derive(Debug, Clone, Default)]
pub struct Planner {
    rules: Vec<PlanRule>,
    default_tool: Option<String>,
}

impl Planner {
    /// Rules are ordered by descending priority; equal priorities keep the
    /// order given here.
    pub fn new(mut rules: Vec<PlanRule>) -> Self {
        // stable sort keeps registration order among ties
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules,
            default_tool: None,
        }
    }

    pub fn with_default_tool(mut self, tool: impl Into<String>) -> Self {
        self.default_tool = Some(tool.into());
        self
    }

    pub fn rules(&self) -> &[PlanRule] {
        &self.rules
    }

    pub fn default_tool(&self) -> Option<&str> {
        self.default_tool.as_deref()
    }

    /// Choose a tool for the request.
    ///
    /// The first matching rule with at least one selectable candidate wins.
    /// When no rule yields a candidate the default tool is tried.
    pub fn plan(&self, request: &PlanRequest) -> PlanDecision {
        let mut rejected = Vec::new();
        let mut matched_any = false;

        for rule in &self.rules {
            if !rule.condition.matches(&request.payload, request.budget.as_ref()) {
                continue;
            }
            matched_any = true;

            let mut viable: Vec<String> = Vec::new();
            for candidate in rule.action.candidates() {
                match request.unselectable(candidate) {
                    Some(reason) => rejected.push(RejectedCandidate {
                        tool: candidate.to_string(),
                        rule: Some(rule.name.clone()),
                        reason,
                    }),
                    None => viable.push(candidate.to_string()),
                }
            }

            if !viable.is_empty() {
                let tool = viable.remove(0);
                return PlanDecision::Selected {
                    tool,
                    options: rule.action.options.clone(),
                    fallbacks: viable,
                    rule: Some(rule.name.clone()),
                    rejected,
                };
            }
        }

        if let Some(default) = &self.default_tool {
            match request.unselectable(default) {
                None => {
                    return PlanDecision::Selected {
                        tool: default.clone(),
                        options: Value::Null,
                        fallbacks: Vec::new(),
                        rule: None,
                        rejected,
                    };
                }
                Some(reason) => rejected.push(RejectedCandidate {
                    tool: default.clone(),
                    rule: None,
                    reason,
                }),
            }
        }

        let reason = if rejected.is_empty() && !matched_any {
            "no planning rule matched the request".to_string()
        } else {
            let skipped: Vec<String> = rejected
                .iter()
                .map(|r| format!("{} ({})", r.tool, r.reason))
                .collect();
            format!("every candidate was unselectable: {}", skipped.join(", "))
        };
        PlanDecision::NoViableTool { reason, rejected }
    }
}
