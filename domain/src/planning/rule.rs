//! Planning rules as data
//!
//! A rule pairs a [`RuleCondition`] with a [`RuleAction`]. Conditions are a
//! small serde-tagged language evaluated by one generic matcher, so rule sets
//! can live in configuration and be unit tested without any tool.
//!
//! # Example
//!
//! ```
//! use orchestra_domain::planning::{RuleCondition, PlanRule, RuleAction};
//! use serde_json::json;
//!
//! let rule = PlanRule::new(
//!     "classify",
//!     RuleCondition::RequestType { value: "classification".into() },
//!     RuleAction::new("classifier_bundle"),
//! )
//! .with_priority(10);
//!
//! let payload = json!({"type": "classification", "text": "hello"});
//! assert!(rule.condition.matches(&payload, None));
//! ```

use crate::core::usage::{Budget, BudgetResource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload field inspected by [`RuleCondition::RequestType`]
pub const REQUEST_TYPE_FIELD: &str = "type";

/// Condition under which a rule applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Matches every request
    Always,
    /// Payload field `type` equals `value`
    RequestType { value: String },
    /// Case-insensitive substring match of any keyword in a string field
    Keyword { field: String, keywords: Vec<String> },
    /// Request budget for `resource` is set and at most `limit`
    BudgetAtMost { resource: BudgetResource, limit: f64 },
    /// Request budget for `resource` is unset or at least `limit`
    BudgetAtLeast { resource: BudgetResource, limit: f64 },
    All { conditions: Vec<RuleCondition> },
    Any { conditions: Vec<RuleCondition> },
}

impl RuleCondition {
    pub fn keyword(field: impl Into<String>, keywords: &[&str]) -> Self {
        RuleCondition::Keyword {
            field: field.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Evaluate the condition against a request payload and budget.
    pub fn matches(&self, payload: &Value, budget: Option<&Budget>) -> bool {
        match self {
            RuleCondition::Always => true,
            RuleCondition::RequestType { value } => payload
                .get(REQUEST_TYPE_FIELD)
                .and_then(Value::as_str)
                .is_some_and(|t| t == value),
            RuleCondition::Keyword { field, keywords } => {
                let Some(text) = lookup(payload, field).and_then(Value::as_str) else {
                    return false;
                };
                let text = text.to_lowercase();
                keywords
                    .iter()
                    .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
            }
            RuleCondition::BudgetAtMost { resource, limit } => budget
                .and_then(|b| b.limit(*resource))
                .is_some_and(|v| v <= *limit),
            RuleCondition::BudgetAtLeast { resource, limit } => {
                match budget.and_then(|b| b.limit(*resource)) {
                    Some(v) => v >= *limit,
                    // no ceiling at all is as generous as it gets
                    None => true,
                }
            }
            RuleCondition::All { conditions } => {
                conditions.iter().all(|c| c.matches(payload, budget))
            }
            RuleCondition::Any { conditions } => {
                conditions.iter().any(|c| c.matches(payload, budget))
            }
        }
    }
}

/// Dotted-path lookup into a JSON payload (`"input.text"`).
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |current, segment| current.get(segment))
}

/// What to run when a rule matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
    /// Tried in order when the primary tool is unselectable or fails
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl RuleAction {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            options: Value::Null,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: &[&str]) -> Self {
        self.fallbacks = fallbacks.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Primary tool followed by fallbacks, duplicates removed.
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(1 + self.fallbacks.len());
        for name in std::iter::once(&self.tool).chain(self.fallbacks.iter()) {
            if !out.contains(&name.as_str()) {
                out.push(name);
            }
        }
        out
    }
}

/// A named, prioritized planning rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRule {
    pub name: String,
    /// Higher wins; ties keep registration order
    #[serde(default)]
    pub priority: i32,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

impl PlanRule {
    pub fn new(name: impl Into<String>, condition: RuleCondition, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            condition,
            action,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
