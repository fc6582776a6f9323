//! Workflow Execution Engine
//!
//! Walks the top-level step list with a program counter. Every step either
//! advances the counter by one or, when a `goto` ran at the top level or
//! inside one of its condition or loop bodies, moves it to the top-level step
//! whose id matches the target. The run ends when the counter passes the
//! last step. Step failures are logged and never stop the run.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{info, warn};
use thiserror::Error;

use crate::actions::Actions;
use crate::context::Context;
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::{load_workflow, LoadError, Step, Workflow};

use super::dispatch::{Dispatcher, Flow, Scope, StepOutcome};
use super::outputs::OutputStore;
use super::parallel::DEFAULT_MAX_WORKERS;

/// Directory the per-workflow output directories are created under.
pub const DEFAULT_OUTPUT_ROOT: &str = "output";

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to create output directory '{}': {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Run settings shared by every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root of the output tree
    pub output_root: PathBuf,
    /// Worker capacity for parallel steps that do not set their own
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Maps top-level step ids to their index. The first occurrence of an id wins.
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    positions: HashMap<String, usize>,
}

impl LabelIndex {
    pub fn build(steps: &[Step]) -> Self {
        let mut positions = HashMap::new();
        for (index, step) in steps.iter().enumerate() {
            if let Some(id) = &step.id {
                positions.entry(id.clone()).or_insert(index);
            }
        }
        Self { positions }
    }

    pub fn get(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// How the program counter moved after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced,
    Jumped { from: usize, to: usize },
    /// A `goto` named an id that does not exist; the counter advanced instead
    MissedJump { target: String },
}

/// What one call to [`ProgramCounter::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub transition: Transition,
    /// Whether the step, and everything it ran sequentially, succeeded
    pub succeeded: bool,
}

/// Cursor over the top-level steps of a workflow.
#[derive(Debug)]
pub struct ProgramCounter<'a> {
    steps: &'a [Step],
    labels: LabelIndex,
    position: usize,
}

impl<'a> ProgramCounter<'a> {
    pub fn new(steps: &'a [Step]) -> Self {
        Self {
            steps,
            labels: LabelIndex::build(steps),
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current(&self) -> Option<&'a Step> {
        self.steps.get(self.position)
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.steps.len()
    }

    /// Executes the step under the counter and moves the counter.
    ///
    /// Returns `None` once every step has been passed.
    pub fn step(&mut self, dispatcher: &Dispatcher, ctx: &Context) -> Option<Progress> {
        let step = self.current()?;

        let StepOutcome { flow, succeeded } = dispatcher.dispatch(step, ctx, Scope::TopLevel);
        let transition = match flow {
            Flow::Next => {
                self.position += 1;
                Transition::Advanced
            }
            Flow::Jump(target) => match self.labels.get(&target) {
                Some(to) => {
                    info!("Jumping to step '{}' (index {})", target, to);
                    let from = self.position;
                    self.position = to;
                    Transition::Jumped { from, to }
                }
                None => {
                    warn!(
                        "goto target '{}' does not exist, continuing with the next step",
                        target
                    );
                    self.position += 1;
                    Transition::MissedJump { target }
                }
            },
        };
        Some(Progress {
            transition,
            succeeded,
        })
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow_id: String,
    /// Top-level steps executed, counting revisits after a jump
    pub steps_executed: usize,
    pub jumps: usize,
    /// Failures recorded anywhere in the run, nested and parallel included
    pub failed_steps: usize,
    pub elapsed: Duration,
    pub output_dir: PathBuf,
    pub timeline: ExecutionTimeline,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failed_steps == 0
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use stepflow::execution::Engine;
/// use stepflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("workflow.yaml")?;
///     let mut engine = Engine::new(workflow);
///     engine.set_output_root("/data/output");
///     engine.set_max_workers(4);
///
///     let report = engine.run()?;
///     println!("{} step(s) failed", report.failed_steps);
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    config: EngineConfig,
    actions: Actions,
}

impl Engine {
    /// Creates an engine with default settings and handlers.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            config: EngineConfig::default(),
            actions: Actions::default(),
        }
    }

    /// Loads the workflow at `path` and creates an engine for it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self::new(load_workflow(path)?))
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sets the root directory outputs are written under.
    pub fn set_output_root(&mut self, root: impl Into<PathBuf>) {
        self.config.output_root = root.into();
    }

    /// Sets the default worker capacity for parallel steps.
    pub fn set_max_workers(&mut self, max: usize) {
        self.config.max_workers = max.max(1);
    }

    /// Replaces the action handlers.
    pub fn set_actions(&mut self, actions: Actions) {
        self.actions = actions;
    }

    /// Directory this workflow's outputs go to.
    pub fn output_dir(&self) -> PathBuf {
        OutputStore::for_workflow(&self.config.output_root, &self.workflow)
            .dir()
            .to_path_buf()
    }

    /// Runs the workflow on a fresh context.
    pub fn run(&self) -> Result<RunReport, EngineError> {
        self.run_with_context(&Context::new())
    }

    /// Runs the workflow on `ctx`, which may carry pre-set variables.
    ///
    /// Only a failure to create the output directory is an error; step
    /// failures are counted in the report.
    pub fn run_with_context(&self, ctx: &Context) -> Result<RunReport, EngineError> {
        let start_time = Instant::now();

        let outputs = OutputStore::for_workflow(&self.config.output_root, &self.workflow);
        outputs.create().map_err(|source| EngineError::OutputDir {
            path: outputs.dir().to_path_buf(),
            source,
        })?;
        let output_dir = outputs.dir().to_path_buf();

        info!(
            "Starting workflow '{}' v{} ({} steps, max workers: {})",
            self.workflow.id,
            self.workflow.version,
            self.workflow.len(),
            self.config.max_workers
        );
        info!("Writing outputs to {}", output_dir.display());

        let dispatcher =
            Dispatcher::new(self.actions.clone(), outputs).with_max_workers(self.config.max_workers);
        let mut counter = ProgramCounter::new(&self.workflow.steps);
        let mut timeline = ExecutionTimeline::new();
        let mut steps_executed = 0;
        let mut jumps = 0;

        while let Some(step) = counter.current() {
            let position = counter.position();
            timeline.add_event(position, step.display_name(), EventType::Started);

            let Some(progress) = counter.step(&dispatcher, ctx) else {
                break;
            };
            steps_executed += 1;
            if matches!(progress.transition, Transition::Jumped { .. }) {
                jumps += 1;
            }

            let event = if progress.succeeded {
                EventType::Completed
            } else {
                EventType::Failed
            };
            timeline.add_event(position, step.display_name(), event);
        }

        let report = RunReport {
            workflow_id: self.workflow.id.clone(),
            steps_executed,
            jumps,
            failed_steps: dispatcher.failures(),
            elapsed: start_time.elapsed(),
            output_dir,
            timeline,
        };

        info!(
            "Workflow '{}' finished: {} step(s) executed, {} failure(s), {:.2?}",
            report.workflow_id, report.steps_executed, report.failed_steps, report.elapsed
        );
        Ok(report)
    }
}
