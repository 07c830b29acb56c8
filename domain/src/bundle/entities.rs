//! Replicates and the Evidence Bundle

use super::summary::BundleSummary;
use crate::core::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason a replicate was marked invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    SchemaInvalid,
    BudgetExceeded,
    Timeout,
    Cancelled,
    Failed,
    /// The backend itself reported the output as unusable
    Rejected,
}

impl QualityFlag {
    pub fn as_str(&self) -> &str {
        match self {
            QualityFlag::SchemaInvalid => "schema_invalid",
            QualityFlag::BudgetExceeded => "budget_exceeded",
            QualityFlag::Timeout => "timeout",
            QualityFlag::Cancelled => "cancelled",
            QualityFlag::Failed => "failed",
            QualityFlag::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validity verdict of one replicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateQuality {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub flags: Vec<QualityFlag>,
}

impl Default for ReplicateQuality {
    fn default() -> Self {
        Self::valid()
    }
}

impl ReplicateQuality {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn invalid(flag: QualityFlag, error: impl Into<String>) -> Self {
        Self::valid().mark_invalid(flag, error)
    }

    /// Record a failure; an invalid replicate never becomes valid again.
    pub fn mark_invalid(mut self, flag: QualityFlag, error: impl Into<String>) -> Self {
        self.valid = false;
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self.errors.push(error.into());
        self
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// What a single generation call hands back to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub data: Value,
    pub usage: Usage,
    /// Backend-side verdict; `None` means the backend vouches for the output
    pub quality: Option<ReplicateQuality>,
}

impl Generation {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            usage: Usage::default(),
            quality: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_quality(mut self, quality: ReplicateQuality) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// One recorded replica execution. Immutable once the engine records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replicate {
    /// Replica index within the bundle
    pub id: usize,
    pub seed: u64,
    /// Raw output; `null` when the replica produced nothing
    pub data: Value,
    pub quality: ReplicateQuality,
    pub usage: Usage,
    pub elapsed_ms: u64,
}

impl Replicate {
    pub fn is_valid(&self) -> bool {
        self.quality.valid
    }
}

/// Descriptive header of an Evidence Bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    pub task_id: String,
    pub k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub seeds: Vec<u64>,
    pub early_stopped: bool,
    /// Replicas actually started
    pub launched: usize,
    /// Replicas that produced a recorded outcome, valid or not
    pub completed: usize,
}

/// Atomic result of a bundle tool: raw replicates plus computed statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub meta: BundleMeta,
    /// Index ordered, never completion ordered
    pub replicates: Vec<Replicate>,
    pub summary: BundleSummary,
}

impl EvidenceBundle {
    pub fn valid_count(&self) -> usize {
        self.replicates.iter().filter(|r| r.is_valid()).count()
    }

    /// Usage summed across every replicate, valid or not.
    pub fn total_usage(&self) -> Usage {
        self.replicates.iter().map(|r| r.usage).sum()
    }

    /// Consensus object, the natural "answer" of the bundle
    pub fn consensus_value(&self) -> Value {
        Value::Object(
            self.summary
                .consensus
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mark_invalid_accumulates() {
        let q = ReplicateQuality::valid()
            .mark_invalid(QualityFlag::SchemaInvalid, "missing field `value`")
            .mark_invalid(QualityFlag::SchemaInvalid, "`score` must be a number");
        assert!(!q.valid);
        assert_eq!(q.flags, vec![QualityFlag::SchemaInvalid]);
        assert_eq!(q.errors.len(), 2);
    }

    #[test]
    fn test_quality_serializes_snake_case_flags() {
        let q = ReplicateQuality::invalid(QualityFlag::BudgetExceeded, "tokens");
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["flags"], json!(["budget_exceeded"]));
        assert_eq!(v["valid"], json!(false));
    }

    #[test]
    fn test_total_usage() {
        let replicate = |id: usize, tokens: u64, valid: bool| Replicate {
            id,
            seed: id as u64,
            data: json!({}),
            quality: if valid {
                ReplicateQuality::valid()
            } else {
                ReplicateQuality::invalid(QualityFlag::Failed, "boom")
            },
            usage: Usage::tokens(tokens),
            elapsed_ms: 1,
        };
        let bundle = EvidenceBundle {
            meta: BundleMeta {
                task_id: "t".into(),
                k: 3,
                model: None,
                seeds: vec![0, 1, 2],
                early_stopped: false,
                launched: 3,
                completed: 3,
            },
            replicates: vec![replicate(0, 50, true), replicate(1, 50, false), replicate(2, 50, true)],
            summary: BundleSummary::insufficient(vec![]),
        };
        assert_eq!(bundle.total_usage().tokens, 150);
        assert_eq!(bundle.valid_count(), 2);
    }
}
