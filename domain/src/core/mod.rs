//! Core value types shared by every other domain module

pub mod error;
pub mod usage;

pub use error::{ToolError, ToolErrorKind};
pub use usage::{Budget, BudgetResource, BudgetViolation, Usage};
