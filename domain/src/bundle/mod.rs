//! Evidence Bundle domain module
//!
//! A bundle tool runs K replicas of the same unit of work and reduces their
//! outputs into an [`EvidenceBundle`]:
//!
//! ```text
//!   BundleOptions ──▶ seeds[0..k]
//!                        │
//!        ┌───────────────┼───────────────┐
//!        ▼               ▼               ▼
//!   Replicate 0     Replicate 1     Replicate 2   (schema-checked, budgeted)
//!        └───────────────┼───────────────┘
//!                        ▼
//!              summarize() ──▶ BundleSummary
//!                              consensus / disagreements /
//!                              pairwise_distance / confidence
//! ```
//!
//! Everything here is pure. Scheduling, cancellation and budgets at run time
//! belong to the bundle engine in the application layer.

pub mod aggregate;
pub mod distance;
pub mod entities;
pub mod options;
pub mod schema;
pub mod summary;

pub use aggregate::{WHOLE_VALUE_FIELD, pairwise_matrix, summarize};
pub use distance::{DistanceConfig, StringDistance, replicate_distance, value_distance};
pub use entities::{
    BundleMeta, EvidenceBundle, Generation, QualityFlag, Replicate, ReplicateQuality,
};
pub use options::{BundleOptions, DEFAULT_EPSILON};
pub use schema::{FieldType, OutputSchema, PropertyRule};
pub use summary::{BundleSummary, Disagreement};
