//! Resource accounting: consumed [`Usage`] and ceiling [`Budget`].
//!
//! Both types measure the same three resources (tokens, dollars, wall time),
//! so a budget check is a field-by-field comparison that reports the first
//! resource that went over as a [`BudgetViolation`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resource that can be budgeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetResource {
    Tokens,
    CostUsd,
    TimeMs,
}

impl BudgetResource {
    pub fn as_str(&self) -> &str {
        match self {
            BudgetResource::Tokens => "tokens",
            BudgetResource::CostUsd => "cost_usd",
            BudgetResource::TimeMs => "time_ms",
        }
    }
}

impl std::fmt::Display for BudgetResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resources consumed by a tool call, a replica or a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub tokens: u64,
    pub cost_usd: f64,
    pub time_ms: u64,
}

impl Usage {
    pub fn new(tokens: u64, cost_usd: f64, time_ms: u64) -> Self {
        Self {
            tokens,
            cost_usd,
            time_ms,
        }
    }

    pub fn tokens(tokens: u64) -> Self {
        Self {
            tokens,
            ..Default::default()
        }
    }

    pub fn with_time_ms(mut self, time_ms: u64) -> Self {
        self.time_ms = time_ms;
        self
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.tokens = self.tokens.saturating_add(other.tokens);
        self.cost_usd += other.cost_usd;
        self.time_ms = self.time_ms.saturating_add(other.time_ms);
    }

    /// Amount consumed for a single resource, as a float for comparison.
    pub fn amount(&self, resource: BudgetResource) -> f64 {
        match resource {
            BudgetResource::Tokens => self.tokens as f64,
            BudgetResource::CostUsd => self.cost_usd,
            BudgetResource::TimeMs => self.time_ms as f64,
        }
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Self {
        iter.fold(Usage::default(), |mut acc, u| {
            acc.add(&u);
            acc
        })
    }
}

/// Resource ceiling. Unset fields are unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
}

impl Budget {
    pub fn tokens(limit: u64) -> Self {
        Self {
            tokens: Some(limit),
            ..Default::default()
        }
    }

    pub fn cost_usd(limit: f64) -> Self {
        Self {
            cost_usd: Some(limit),
            ..Default::default()
        }
    }

    pub fn time_ms(limit: u64) -> Self {
        Self {
            time_ms: Some(limit),
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, limit: u64) -> Self {
        self.tokens = Some(limit);
        self
    }

    pub fn with_cost_usd(mut self, limit: f64) -> Self {
        self.cost_usd = Some(limit);
        self
    }

    pub fn with_time_ms(mut self, limit: u64) -> Self {
        self.time_ms = Some(limit);
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.tokens.is_none() && self.cost_usd.is_none() && self.time_ms.is_none()
    }

    /// Limit for a single resource, if one is set.
    pub fn limit(&self, resource: BudgetResource) -> Option<f64> {
        match resource {
            BudgetResource::Tokens => self.tokens.map(|t| t as f64),
            BudgetResource::CostUsd => self.cost_usd,
            BudgetResource::TimeMs => self.time_ms.map(|t| t as f64),
        }
    }

    /// Check consumed usage against this budget.
    ///
    /// Resources are checked in a fixed order (tokens, cost, time) and the
    /// first one over its limit is reported.
    pub fn check(&self, usage: &Usage) -> Result<(), BudgetViolation> {
        for resource in [
            BudgetResource::Tokens,
            BudgetResource::CostUsd,
            BudgetResource::TimeMs,
        ] {
            if let Some(limit) = self.limit(resource) {
                let actual = usage.amount(resource);
                if actual > limit {
                    return Err(BudgetViolation {
                        resource,
                        limit,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether every bounded resource has been fully consumed or exceeded.
    ///
    /// Used to refuse new work: once any limit is reached nothing more fits.
    pub fn is_exhausted_by(&self, usage: &Usage) -> bool {
        [
            BudgetResource::Tokens,
            BudgetResource::CostUsd,
            BudgetResource::TimeMs,
        ]
        .into_iter()
        .any(|r| self.limit(r).is_some_and(|limit| usage.amount(r) >= limit))
    }

    /// Split this budget evenly across `parts` consumers.
    pub fn divide(&self, parts: usize) -> Budget {
        let parts = parts.max(1);
        Budget {
            tokens: self.tokens.map(|t| t / parts as u64),
            cost_usd: self.cost_usd.map(|c| c / parts as f64),
            time_ms: self.time_ms,
        }
    }
}

/// A budget that was exceeded, with the offending resource and amounts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Error)]
#[error("{resource} budget exceeded: limit={limit}, actual={actual}")]
pub struct BudgetViolation {
    pub resource: BudgetResource,
    pub limit: f64,
    pub actual: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_add_and_sum() {
        let mut usage = Usage::new(10, 0.5, 100);
        usage.add(&Usage::new(5, 0.25, 50));
        assert_eq!(usage.tokens, 15);
        assert_eq!(usage.time_ms, 150);

        let total: Usage = vec![Usage::tokens(1), Usage::tokens(2), Usage::tokens(3)]
            .into_iter()
            .sum();
        assert_eq!(total.tokens, 6);
    }

    #[test]
    fn test_budget_check_reports_limit_and_actual() {
        let budget = Budget::tokens(100);
        let violation = budget.check(&Usage::tokens(150)).unwrap_err();

        assert_eq!(violation.resource, BudgetResource::Tokens);
        assert_eq!(violation.limit, 100.0);
        assert_eq!(violation.actual, 150.0);
        assert!(budget.check(&Usage::tokens(100)).is_ok());
    }

    #[test]
    fn test_unlimited_budget_never_fails() {
        let budget = Budget::default();
        assert!(budget.is_unlimited());
        assert!(budget.check(&Usage::new(u64::MAX, 1e9, u64::MAX)).is_ok());
        assert!(!budget.is_exhausted_by(&Usage::new(u64::MAX, 1e9, u64::MAX)));
    }

    #[test]
    fn test_exhausted_at_limit() {
        let budget = Budget::cost_usd(1.0);
        assert!(!budget.is_exhausted_by(&Usage::new(0, 0.99, 0)));
        assert!(budget.is_exhausted_by(&Usage::new(0, 1.0, 0)));
    }

    #[test]
    fn test_divide_keeps_time() {
        let budget = Budget::tokens(300).with_cost_usd(3.0).with_time_ms(1000);
        let share = budget.divide(3);
        assert_eq!(share.tokens, Some(100));
        assert_eq!(share.cost_usd, Some(1.0));
        assert_eq!(share.time_ms, Some(1000));
    }

    #[test]
    fn test_violation_display() {
        let v = BudgetViolation {
            resource: BudgetResource::Tokens,
            limit: 100.0,
            actual: 150.0,
        };
        assert_eq!(v.to_string(), "tokens budget exceeded: limit=100, actual=150");
    }
}
