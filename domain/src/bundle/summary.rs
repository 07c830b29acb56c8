//! Computed statistics of an Evidence Bundle

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A field on which valid replicates diverge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub field: String,
    /// Distinct values observed across valid replicates, first-seen order
    pub values: Vec<Value>,
    /// Distinct values reported only by invalid replicates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_values: Vec<Value>,
}

/// Consensus, disagreement and confidence over a set of replicates.
///
/// Created once by the aggregator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub consensus: BTreeMap<String, Value>,
    pub disagreements: Vec<Disagreement>,
    /// Symmetric, zero-diagonal matrix over valid replicates
    pub pairwise_distance: Vec<Vec<f64>>,
    /// Replicate id of each matrix row
    pub replicate_ids: Vec<usize>,
    pub confidence: f64,
    #[serde(default)]
    pub insufficient_evidence: bool,
}

impl BundleSummary {
    /// Summary for fewer than two valid replicates.
    pub fn insufficient(replicate_ids: Vec<usize>) -> Self {
        let n = replicate_ids.len();
        Self {
            consensus: BTreeMap::new(),
            disagreements: Vec::new(),
            pairwise_distance: vec![vec![0.0; n]; n],
            replicate_ids,
            confidence: 0.0,
            insufficient_evidence: true,
        }
    }

    /// Mean of the strict upper triangle; 0 when there are no pairs.
    pub fn mean_distance(&self) -> f64 {
        let n = self.pairwise_distance.len();
        let mut sum = 0.0;
        let mut pairs = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                sum += self.pairwise_distance[i][j];
                pairs += 1;
            }
        }
        if pairs == 0 { 0.0 } else { sum / pairs as f64 }
    }

    /// Distance between two replicates by id, if both were valid.
    pub fn distance_between(&self, a: usize, b: usize) -> Option<f64> {
        let i = self.replicate_ids.iter().position(|id| *id == a)?;
        let j = self.replicate_ids.iter().position(|id| *id == b)?;
        Some(self.pairwise_distance[i][j])
    }

    pub fn is_unanimous(&self) -> bool {
        !self.insufficient_evidence && self.disagreements.is_empty()
    }

    pub fn disagreement(&self, field: &str) -> Option<&Disagreement> {
        self.disagreements.iter().find(|d| d.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insufficient_summary_shape() {
        let s = BundleSummary::insufficient(vec![2]);
        assert_eq!(s.confidence, 0.0);
        assert!(s.insufficient_evidence);
        assert_eq!(s.pairwise_distance, vec![vec![0.0]]);
        assert!(!s.is_unanimous());
    }

    #[test]
    fn test_disagreement_omits_empty_invalid_values() {
        let d = Disagreement {
            field: "value".into(),
            values: vec![json!(0), json!(1), json!(2)],
            invalid_values: vec![],
        };
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"field": "value", "values": [0, 1, 2]})
        );
    }

    #[test]
    fn test_distance_between_by_id() {
        let s = BundleSummary {
            consensus: BTreeMap::new(),
            disagreements: vec![],
            pairwise_distance: vec![vec![0.0, 0.4], vec![0.4, 0.0]],
            replicate_ids: vec![0, 2],
            confidence: 0.6,
            insufficient_evidence: false,
        };
        assert_eq!(s.distance_between(0, 2), Some(0.4));
        assert_eq!(s.distance_between(0, 1), None);
        assert!((s.mean_distance() - 0.4).abs() < 1e-12);
    }
}
