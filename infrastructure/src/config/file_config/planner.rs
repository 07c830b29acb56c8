//! Planner rules from TOML (`[planner]` section)
//!
//! ```toml
//! [planner]
//! default_tool = "echo"
//!
//! [[planner.rules]]
//! name = "classify"
//! priority = 10
//! condition = { kind = "request_type", value = "classification" }
//! action = { tool = "echo_bundle", fallbacks = ["echo"] }
//! ```

use orchestra_domain::{PlanRule, Planner};
use serde::{Deserialize, Serialize};

/// Raw planner configuration from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePlannerConfig {
    /// Tried when no rule yields a candidate
    pub default_tool: Option<String>,
    pub rules: Vec<PlanRule>,
}

impl FilePlannerConfig {
    pub fn to_planner(&self) -> Planner {
        let planner = Planner::new(self.rules.clone());
        match &self.default_tool {
            Some(tool) => planner.with_default_tool(tool),
            None => planner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_domain::RuleCondition;

    #[test]
    fn test_rules_deserialize() {
        let toml_str = r#"
default_tool = "echo"

[[rules]]
name = "classify"
priority = 10
condition = { kind = "request_type", value = "classification" }
action = { tool = "echo_bundle", fallbacks = ["echo"] }

[[rules]]
name = "cheap"
condition = { kind = "budget_at_most", resource = "tokens", limit = 100.0 }
action = { tool = "echo" }
"#;
        let config: FilePlannerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(
            config.rules[0].condition,
            RuleCondition::RequestType {
                value: "classification".into()
            }
        );
        assert_eq!(config.rules[0].action.fallbacks, vec!["echo".to_string()]);

        let planner = config.to_planner();
        assert_eq!(planner.default_tool(), Some("echo"));
        assert_eq!(planner.rules()[0].name, "classify");
    }
}
