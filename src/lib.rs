//! Stepflow - Declarative Workflow Interpreter
//!
//! Runs YAML-defined workflows: ordered steps that call shell commands, drive
//! a browser, ask a text-generation service, branch on conditions, loop, jump
//! to labels and fan out over bounded parallel branches. Steps share a
//! run-scoped context of variables and `{{ placeholder }}` templates read
//! from it.
//!
//! # Architecture
//!
//! - [`workflow`]: step model, YAML loading and lint checks
//! - [`context`]: the variable store, template resolution and conditions
//! - [`execution`]: program counter, dispatch, control flow and parallelism
//! - [`actions`]: traits for the outside world (shell, browser, AI, notify)
//! - [`monitoring`]: per-step execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use stepflow::execution::Engine;
//! use stepflow::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = load_workflow("workflow.yaml")?;
//!
//!     let mut engine = Engine::new(workflow);
//!     engine.set_output_root("output");
//!     engine.set_max_workers(10);
//!
//!     let report = engine.run()?;
//!     println!("{} failed step(s)", report.failed_steps);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod context;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use context::Context;
pub use execution::engine::{Engine, EngineError, RunReport};
pub use workflow::model::{Step, StepKind, Workflow};
pub use workflow::parser::{load_workflow, parse_workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stepflow";
