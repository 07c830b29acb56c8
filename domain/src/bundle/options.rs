//! Per-invocation parameters of a bundle run

use super::distance::DistanceConfig;
use crate::core::usage::Budget;
use serde::{Deserialize, Serialize};

/// Default early-stop threshold
pub const DEFAULT_EPSILON: f64 = 0.2;

/// Options controlling how many replicas a bundle tool runs and how they are
/// judged.
///
/// `epsilon = None` disables early stopping; early stopping is also inert for
/// `k <= 2` because there is nothing left to skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    /// Number of replicas
    pub k: usize,
    /// Explicit seeds; missing entries are derived from `base_seed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seeds: Option<Vec<u64>>,
    pub base_seed: u64,
    pub epsilon: Option<f64>,
    /// Concurrency bound; defaults to `k`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    /// Output contract every replica is validated against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_budget: Option<Budget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_budget: Option<Budget>,
    /// Caller-provided task id recorded in the bundle meta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub distance: DistanceConfig,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            k: 3,
            seeds: None,
            base_seed: 0,
            epsilon: Some(DEFAULT_EPSILON),
            max_parallel: None,
            schema_uri: None,
            replica_budget: None,
            global_budget: None,
            task_id: None,
            distance: DistanceConfig::default(),
        }
    }
}

impl BundleOptions {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn with_epsilon(mut self, epsilon: Option<f64>) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_schema_uri(mut self, uri: impl Into<String>) -> Self {
        self.schema_uri = Some(uri.into());
        self
    }

    pub fn with_replica_budget(mut self, budget: Budget) -> Self {
        self.replica_budget = Some(budget);
        self
    }

    pub fn with_global_budget(mut self, budget: Budget) -> Self {
        self.global_budget = Some(budget);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_distance(mut self, distance: DistanceConfig) -> Self {
        self.distance = distance;
        self
    }

    /// One seed per replica: explicit seeds first, then `base_seed + index`.
    pub fn effective_seeds(&self) -> Vec<u64> {
        let explicit = self.seeds.as_deref().unwrap_or(&[]);
        (0..self.k)
            .map(|i| {
                explicit
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.base_seed.wrapping_add(i as u64))
            })
            .collect()
    }

    /// Concurrency bound clamped to `1..=k`.
    pub fn effective_parallelism(&self) -> usize {
        self.max_parallel.unwrap_or(self.k).clamp(1, self.k.max(1))
    }

    /// Early-stop threshold when early stopping can actually skip work.
    pub fn early_stop_threshold(&self) -> Option<f64> {
        match self.epsilon {
            Some(eps) if self.k > 2 => Some(eps),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.k == 0 {
            return Err("k must be at least 1".to_string());
        }
        if let Some(eps) = self.epsilon.filter(|e| e.is_nan() || *e < 0.0) {
            return Err(format!("epsilon must be non-negative, got {}", eps));
        }
        if self.max_parallel == Some(0) {
            return Err("max_parallel must be at least 1".to_string());
        }
        if self.distance.numeric_tolerance < 0.0 {
            return Err("numeric_tolerance must be non-negative".to_string());
        }
        Ok(())
    }
}
