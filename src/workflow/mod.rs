//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating declarative workflows.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, StepKind, Workflow)
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Configuration hazard checks

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{GroupShare, Step, StepKind, Workflow};
pub use parser::{load_workflow, parse_workflow, LoadError};
pub use validator::{validate_workflow, ValidationIssue};
