//! Output contract for replica validation
//!
//! A small JSON-Schema subset: top-level `type`, `required`,
//! `properties.<name>.type`, `properties.<name>.enum`, numeric
//! `minimum`/`maximum` and `additionalProperties: false`. Anything else in the
//! document is ignored.

use serde_json::Value;
use std::collections::BTreeMap;

/// JSON type a property must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Null => "null",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Null => value.is_null(),
        }
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(FieldType::String),
            "number" => Ok(FieldType::Number),
            "integer" => Ok(FieldType::Integer),
            "boolean" => Ok(FieldType::Boolean),
            "array" => Ok(FieldType::Array),
            "object" => Ok(FieldType::Object),
            "null" => Ok(FieldType::Null),
            other => Err(format!("Unknown schema type: {}", other)),
        }
    }
}

/// Constraints on a single property
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyRule {
    pub field_type: Option<FieldType>,
    pub allowed: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

/// Parsed output contract
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSchema {
    pub root_type: Option<FieldType>,
    pub required: Vec<String>,
    pub properties: BTreeMap<String, PropertyRule>,
    pub additional_properties: bool,
}

impl OutputSchema {
    /// Parse the supported subset out of a JSON Schema document.
    pub fn from_json(doc: &Value) -> Result<Self, String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| "schema must be a JSON object".to_string())?;

        let root_type = match obj.get("type") {
            Some(Value::String(t)) => Some(t.parse()?),
            Some(other) => return Err(format!("`type` must be a string, got {}", other)),
            None => None,
        };

        let required = match obj.get("required") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| format!("`required` entries must be strings, got {}", v))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(format!("`required` must be an array, got {}", other)),
            None => Vec::new(),
        };

        let mut properties = BTreeMap::new();
        if let Some(props) = obj.get("properties") {
            let props = props
                .as_object()
                .ok_or_else(|| "`properties` must be an object".to_string())?;
            for (name, prop) in props {
                properties.insert(name.clone(), parse_property(name, prop)?);
            }
        }

        let additional_properties = obj
            .get("additionalProperties")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        Ok(Self {
            root_type,
            required,
            properties,
            additional_properties,
        })
    }

    /// Validate a payload, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(t) = self.root_type
            && !t.matches(value)
        {
            errors.push(format!("expected {} at top level", t.as_str()));
            return Err(errors);
        }

        let Some(obj) = value.as_object() else {
            if !self.required.is_empty() || !self.properties.is_empty() {
                errors.push("expected an object".to_string());
            }
            return if errors.is_empty() { Ok(()) } else { Err(errors) };
        };

        for name in &self.required {
            if !obj.contains_key(name) {
                errors.push(format!("missing required field `{}`", name));
            }
        }

        for (name, field) in obj {
            match self.properties.get(name) {
                Some(rule) => check_property(name, rule, field, &mut errors),
                None if !self.additional_properties => {
                    errors.push(format!("unexpected field `{}`", name));
                }
                None => {}
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn parse_property(name: &str, prop: &Value) -> Result<PropertyRule, String> {
    let prop = prop
        .as_object()
        .ok_or_else(|| format!("property `{}` must be an object", name))?;

    let field_type = match prop.get("type") {
        Some(Value::String(t)) => Some(t.parse()?),
        Some(other) => {
            return Err(format!("property `{}` has non-string type {}", name, other));
        }
        None => None,
    };

    Ok(PropertyRule {
        field_type,
        allowed: prop.get("enum").and_then(Value::as_array).cloned(),
        minimum: prop.get("minimum").and_then(Value::as_f64),
        maximum: prop.get("maximum").and_then(Value::as_f64),
    })
}

fn check_property(name: &str, rule: &PropertyRule, value: &Value, errors: &mut Vec<String>) {
    if let Some(t) = rule.field_type
        && !t.matches(value)
    {
        errors.push(format!("field `{}` must be {}", name, t.as_str()));
        return;
    }
    if let Some(allowed) = &rule.allowed
        && !allowed.contains(value)
    {
        errors.push(format!("field `{}` is not one of the allowed values", name));
    }
    if let Some(n) = value.as_f64() {
        if rule.minimum.is_some_and(|min| n < min) {
            errors.push(format!("field `{}` is below minimum", name));
        }
        if rule.maximum.is_some_and(|max| n > max) {
            errors.push(format!("field `{}` is above maximum", name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> OutputSchema {
        OutputSchema::from_json(&json!({
            "type": "object",
            "required": ["label", "score"],
            "properties": {
                "label": {"type": "string", "enum": ["cat", "dog"]},
                "score": {"type": "number", "minimum": 0, "maximum": 1}
            },
            "additionalProperties": false
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_payload() {
        assert!(schema().validate(&json!({"label": "cat", "score": 0.9})).is_ok());
    }

    #[test]
    fn test_collects_all_violations() {
        let errors = schema()
            .validate(&json!({"label": "cow", "score": 2, "extra": 1}))
            .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_missing_required_and_wrong_type() {
        let errors = schema().validate(&json!({"score": "high"})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("missing required field `label`")));
        assert!(errors.iter().any(|e| e.contains("`score` must be number")));
    }

    #[test]
    fn test_root_type_mismatch() {
        assert!(schema().validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_integer_type() {
        assert!(FieldType::Integer.matches(&json!(3)));
        assert!(!FieldType::Integer.matches(&json!(3.5)));
    }

    #[test]
    fn test_rejects_malformed_schema() {
        assert!(OutputSchema::from_json(&json!("object")).is_err());
        assert!(OutputSchema::from_json(&json!({"type": "widget"})).is_err());
        assert!(OutputSchema::from_json(&json!({"required": "label"})).is_err());
    }
}
