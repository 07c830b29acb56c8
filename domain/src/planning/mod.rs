//! Tool selection
//!
//! - [`rule`] - rule data and the generic condition matcher
//! - [`planner`] - priority ordering, circuit/budget filtering, fallbacks

pub mod planner;
pub mod rule;

pub use planner::{PlanDecision, PlanRequest, Planner, RejectedCandidate, RejectionReason};
pub use rule::{PlanRule, RuleAction, RuleCondition};
