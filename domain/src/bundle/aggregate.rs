//! Evidence Bundle aggregation
//!
//! Reduces a replicate set to a [`BundleSummary`]. Pure and deterministic:
//! the same replicates and the same [`DistanceConfig`] always produce the same
//! summary, independent of completion order.
//!
//! Non-object payloads are treated as a single field named `$`.

use super::distance::{DistanceConfig, replicate_distance};
use super::entities::Replicate;
use super::summary::{BundleSummary, Disagreement};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Field name used for non-object payloads
pub const WHOLE_VALUE_FIELD: &str = "$";

/// Summarize replicates. Invalid replicates only feed `invalid_values`.
pub fn summarize(replicates: &[Replicate], config: &DistanceConfig) -> BundleSummary {
    let valid: Vec<&Replicate> = replicates.iter().filter(|r| r.is_valid()).collect();
    let ids: Vec<usize> = valid.iter().map(|r| r.id).collect();

    if valid.len() < 2 {
        return BundleSummary::insufficient(ids);
    }

    let matrix = pairwise_matrix(&valid, config);
    let confidence = confidence_from(&matrix);

    let invalid: Vec<&Replicate> = replicates.iter().filter(|r| !r.is_valid()).collect();
    let (consensus, disagreements) = consensus_and_disagreements(&valid, &invalid, config);

    BundleSummary {
        consensus,
        disagreements,
        pairwise_distance: matrix,
        replicate_ids: ids,
        confidence,
        insufficient_evidence: false,
    }
}

/// Symmetric distance matrix with a zero diagonal.
pub fn pairwise_matrix(replicates: &[&Replicate], config: &DistanceConfig) -> Vec<Vec<f64>> {
    let n = replicates.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = replicate_distance(&replicates[i].data, &replicates[j].data, config);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

/// `1 - mean(upper triangle)`, clamped to `[0, 1]`.
fn confidence_from(matrix: &[Vec<f64>]) -> f64 {
    let n = matrix.len();
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for (i, row) in matrix.iter().enumerate() {
        for d in row.iter().skip(i + 1) {
            sum += d;
            pairs += 1;
        }
    }
    if n < 2 || pairs == 0 {
        return 0.0;
    }
    let confidence = 1.0 - sum / pairs as f64;
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn fields_of(data: &Value) -> Vec<(String, &Value)> {
    match data {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        other => vec![(WHOLE_VALUE_FIELD.to_string(), other)],
    }
}

fn field_value<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    match data {
        Value::Object(map) => map.get(field),
        other if field == WHOLE_VALUE_FIELD => Some(other),
        _ => None,
    }
}

fn push_distinct(values: &mut Vec<Value>, value: &Value) {
    if !values.contains(value) {
        values.push(value.clone());
    }
}

fn consensus_and_disagreements(
    valid: &[&Replicate],
    invalid: &[&Replicate],
    config: &DistanceConfig,
) -> (BTreeMap<String, Value>, Vec<Disagreement>) {
    let fields: BTreeSet<String> = valid
        .iter()
        .flat_map(|r| fields_of(&r.data).into_iter().map(|(name, _)| name))
        .collect();

    let mut consensus = BTreeMap::new();
    let mut disagreements = Vec::new();

    for field in fields {
        let observed: Vec<Option<&Value>> =
            valid.iter().map(|r| field_value(&r.data, &field)).collect();

        let unanimous = match observed.first().copied().flatten() {
            Some(first) => observed
                .iter()
                .all(|v| v.is_some_and(|v| config.values_agree(first, v))),
            None => false,
        };

        if unanimous {
            if let Some(first) = observed.first().copied().flatten() {
                consensus.insert(field, first.clone());
            }
            continue;
        }

        let mut values = Vec::new();
        for v in observed.into_iter().flatten() {
            push_distinct(&mut values, v);
        }

        let mut invalid_values = Vec::new();
        for r in invalid {
            match field_value(&r.data, &field) {
                Some(v) if !values.contains(v) => push_distinct(&mut invalid_values, v),
                _ => {}
            }
        }

        disagreements.push(Disagreement {
            field,
            values,
            invalid_values,
        });
    }

    (consensus, disagreements)
}
