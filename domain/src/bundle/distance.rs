//! Distance functions between replicate outputs.
//!
//! All distances are in `[0, 1]` where 0 means "identical for our purposes".
//!
//! | Value kind | Distance |
//! |------------|----------|
//! | number / number | `|a-b| / max(|a|,|b|)`, 0 within `numeric_tolerance` |
//! | string / string | equality flag, or token Jaccard when configured |
//! | bool / bool, null / null | equality flag |
//! | array / array | Jaccard distance over the implied element sets |
//! | object / object | weighted mean over shared keys, recursively |
//! | mismatched kinds | 1 |
//!
//! Field weights are keyed by dotted path (`"answer.score"`); unlisted fields
//! weigh 1 and a weight of 0 drops the field from the mean.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// How string fields are compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringDistance {
    /// 0 when equal, 1 otherwise
    #[default]
    Exact,
    /// Jaccard distance over lowercase whitespace tokens
    TokenJaccard,
}

/// Tunables for distance and consensus computation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Numbers closer than this are treated as equal
    pub numeric_tolerance: f64,
    /// Per-field weights keyed by dotted path
    pub field_weights: BTreeMap<String, f64>,
    pub string_mode: StringDistance,
}

impl DistanceConfig {
    pub fn with_numeric_tolerance(mut self, tolerance: f64) -> Self {
        self.numeric_tolerance = tolerance.max(0.0);
        self
    }

    pub fn with_field_weight(mut self, path: impl Into<String>, weight: f64) -> Self {
        self.field_weights.insert(path.into(), weight.max(0.0));
        self
    }

    pub fn with_string_mode(mut self, mode: StringDistance) -> Self {
        self.string_mode = mode;
        self
    }

    pub fn weight(&self, path: &str) -> f64 {
        self.field_weights.get(path).copied().unwrap_or(1.0)
    }

    /// Whether two values count as the same observation.
    pub fn values_agree(&self, a: &Value, b: &Value) -> bool {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) if a.is_number() && b.is_number() => {
                (x - y).abs() <= self.numeric_tolerance
            }
            _ => a == b,
        }
    }
}

/// Distance between two replicate payloads.
///
/// Objects are compared over the top-level fields present in both; any other
/// payload is compared as a single value.
pub fn replicate_distance(a: &Value, b: &Value, config: &DistanceConfig) -> f64 {
    value_distance(a, b, "", config)
}

/// Distance between two values found at `path`.
pub fn value_distance(a: &Value, b: &Value, path: &str, config: &DistanceConfig) -> f64 {
    let d = match (a, b) {
        (Value::Null, Value::Null) => 0.0,
        (Value::Bool(x), Value::Bool(y)) => flag(x == y),
        (Value::Number(_), Value::Number(_)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => number_distance(x, y, config.numeric_tolerance),
            _ => flag(a == b),
        },
        (Value::String(x), Value::String(y)) => match config.string_mode {
            StringDistance::Exact => flag(x == y),
            StringDistance::TokenJaccard => jaccard(tokens(x), tokens(y)),
        },
        (Value::Array(x), Value::Array(y)) => jaccard(element_set(x), element_set(y)),
        (Value::Object(x), Value::Object(y)) => object_distance(x, y, path, config),
        _ => 1.0,
    };
    d.clamp(0.0, 1.0)
}

fn flag(equal: bool) -> f64 {
    if equal { 0.0 } else { 1.0 }
}

fn number_distance(x: f64, y: f64, tolerance: f64) -> f64 {
    let diff = (x - y).abs();
    if diff <= tolerance {
        return 0.0;
    }
    let scale = x.abs().max(y.abs());
    if scale == 0.0 || !scale.is_finite() {
        return flag(x == y);
    }
    (diff / scale).min(1.0)
}

fn object_distance(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    path: &str,
    config: &DistanceConfig,
) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut shared = 0usize;

    for (key, left) in a {
        let Some(right) = b.get(key) else {
            continue;
        };
        shared += 1;
        let child = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let weight = config.weight(&child);
        if weight <= 0.0 {
            continue;
        }
        weighted += weight * value_distance(left, right, &child, config);
        total_weight += weight;
    }

    if shared == 0 {
        // Nothing to compare: two empty objects agree, anything else does not
        return flag(a.is_empty() && b.is_empty());
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    weighted / total_weight
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(|t| t.to_lowercase()).collect()
}

fn element_set(items: &[Value]) -> BTreeSet<String> {
    items.iter().map(|v| v.to_string()).collect()
}

fn jaccard(a: BTreeSet<String>, b: BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    1.0 - intersection / union
}
