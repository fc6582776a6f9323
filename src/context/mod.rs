//! Context Module
//!
//! The run-scoped variable store and everything that reads it:
//!
//! - [`store`]: The shared [`Context`] handle and [`ContextPolicy`]
//! - [`template`]: `{{ name }}` substitution for step fields
//! - [`expression`]: The typed condition grammar

pub mod expression;
pub mod store;
pub mod template;

pub use expression::{evaluate, ExpressionError};
pub use store::{Context, ContextPolicy, OUTPUT_SUFFIX};
pub use template::{render, resolve, TemplateError};
