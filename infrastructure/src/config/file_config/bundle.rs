//! Bundle defaults from TOML (`[bundle]` section)
//!
//! Used for bundle tools when a request carries no bundle options.
//!
//! ```toml
//! [bundle]
//! k = 5
//! epsilon = 0.1
//! max_parallel = 2
//! string_mode = "token_jaccard"
//! ```

use orchestra_domain::{BundleOptions, DistanceConfig, StringDistance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw bundle configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBundleConfig {
    /// Number of replicas
    pub k: usize,
    pub epsilon: f64,
    /// Disable to always run all `k` replicas
    pub early_stop: bool,
    pub max_parallel: Option<usize>,
    pub base_seed: u64,
    pub schema_uri: Option<String>,
    pub numeric_tolerance: f64,
    pub string_mode: StringDistance,
    /// Per-field distance weights keyed by dotted path
    pub field_weights: BTreeMap<String, f64>,
}

impl Default for FileBundleConfig {
    fn default() -> Self {
        let options = BundleOptions::default();
        Self {
            k: options.k,
            epsilon: options.epsilon.unwrap_or_default(),
            early_stop: options.epsilon.is_some(),
            max_parallel: None,
            base_seed: options.base_seed,
            schema_uri: None,
            numeric_tolerance: 0.0,
            string_mode: StringDistance::default(),
            field_weights: BTreeMap::new(),
        }
    }
}

impl FileBundleConfig {
    pub fn to_bundle_options(&self) -> BundleOptions {
        let mut options = BundleOptions::default()
            .with_k(self.k)
            .with_base_seed(self.base_seed)
            .with_epsilon(self.early_stop.then_some(self.epsilon))
            .with_distance(DistanceConfig {
                numeric_tolerance: self.numeric_tolerance,
                field_weights: self.field_weights.clone(),
                string_mode: self.string_mode,
            });
        if let Some(max_parallel) = self.max_parallel {
            options = options.with_max_parallel(max_parallel);
        }
        if let Some(uri) = &self.schema_uri {
            options = options.with_schema_uri(uri);
        }
        options
    }
}
