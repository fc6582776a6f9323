//! Workflow Execution Module
//!
//! # Architecture
//!
//! - [`engine`]: program-counter walk over the top-level steps
//! - [`dispatch`]: per-step routing and failure containment
//! - [`control`]: conditions, loops, variables and `split_list`
//! - [`parallel`]: bounded worker pool behind the parallel step kinds
//! - [`outputs`]: the per-run output directory

pub mod control;
pub mod dispatch;
pub mod engine;
pub mod outputs;
pub mod parallel;

pub use control::partition;
pub use dispatch::{Dispatcher, Flow, Scope, StepError, StepOutcome};
pub use engine::{
    Engine, EngineConfig, EngineError, LabelIndex, ProgramCounter, Progress, RunReport, Transition,
    DEFAULT_OUTPUT_ROOT,
};
pub use outputs::{OutputStore, WriteMode};
pub use parallel::{Branch, JoinPolicy, JoinSummary, Task, WorkerPool, DEFAULT_MAX_WORKERS};
