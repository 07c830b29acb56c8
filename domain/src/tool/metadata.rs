//! Tool descriptors

use crate::core::usage::{Budget, BudgetResource};
use serde::{Deserialize, Serialize};

/// Rough per-call resource estimates a tool may declare.
///
/// Used by the planner to rule out tools that cannot fit a request's budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolEstimates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolEstimates {
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_cost_usd(mut self, cost: f64) -> Self {
        self.cost_usd = Some(cost);
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    fn amount(&self, resource: BudgetResource) -> Option<f64> {
        match resource {
            BudgetResource::Tokens => self.tokens.map(|t| t as f64),
            BudgetResource::CostUsd => self.cost_usd,
            BudgetResource::TimeMs => self.duration_ms.map(|d| d as f64),
        }
    }

    /// First budgeted resource the estimate would overrun, if any.
    ///
    /// Unknown estimates never rule a tool out.
    pub fn exceeds(&self, budget: &Budget) -> Option<BudgetResource> {
        [
            BudgetResource::Tokens,
            BudgetResource::CostUsd,
            BudgetResource::TimeMs,
        ]
        .into_iter()
        .find(|r| match (self.amount(*r), budget.limit(*r)) {
            (Some(estimate), Some(limit)) => estimate > limit,
            _ => false,
        })
    }
}

/// Catalog entry describing a registered tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique tool name (registry key)
    pub name: String,
    pub version: String,
    pub description: String,
    /// Backend affinity; tools sharing a provider share a circuit breaker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Whether the tool can run as a K-replica bundle
    pub supports_bundle: bool,
    #[serde(default)]
    pub estimates: ToolEstimates,
}

impl ToolMetadata {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            provider: None,
            supports_bundle: false,
            estimates: ToolEstimates::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_bundle_support(mut self, supported: bool) -> Self {
        self.supports_bundle = supported;
        self
    }

    pub fn with_estimates(mut self, estimates: ToolEstimates) -> Self {
        self.estimates = estimates;
        self
    }

    /// Key of the circuit breaker guarding this tool.
    ///
    /// The provider when one is declared, the tool's own name otherwise.
    pub fn breaker_key(&self) -> &str {
        self.provider.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_key_prefers_provider() {
        let meta = ToolMetadata::new("summarize", "1.0.0", "Summarize text");
        assert_eq!(meta.breaker_key(), "summarize");

        let meta = meta.with_provider("openai");
        assert_eq!(meta.breaker_key(), "openai");
    }

    #[test]
    fn test_estimates_exceed_budget() {
        let estimates = ToolEstimates::default().with_cost_usd(0.5).with_tokens(2000);

        assert_eq!(
            estimates.exceeds(&Budget::cost_usd(0.1)),
            Some(BudgetResource::CostUsd)
        );
        assert_eq!(estimates.exceeds(&Budget::tokens(5000)), None);
        assert_eq!(ToolEstimates::default().exceeds(&Budget::tokens(1)), None);
    }
}
