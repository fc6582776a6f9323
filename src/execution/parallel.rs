//! Parallel Branch Coordination
//!
//! A bounded [`WorkerPool`] runs branch bodies on named threads. Every
//! parallel step kind goes through [`Dispatcher::coordinate`]:
//!
//! - `parallel_for_each`: one branch per item on an isolated context copy,
//!   waits for all of them
//! - `parallel_and_branch`: branches share the caller's context, waits for all
//! - `parallel_or_branch`: branches share the caller's context, returns as soon
//!   as one finishes; the rest keep running detached
//!
//! A `goto` inside a branch is logged and ignored.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::context::{Context, ContextPolicy};
use crate::workflow::Step;

use super::control::resolve_list;
use super::dispatch::{Dispatcher, Scope, StepError, StepOutcome};

/// Worker capacity used when neither the step nor the launcher sets one.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// A unit of work handed to the pool. Returns whether it succeeded.
pub type Task = Box<dyn FnOnce() -> bool + Send + 'static>;

/// When the coordinator hands control back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// After every task has finished
    All,
    /// After the first task finishes
    First,
}

/// What a pool run observed before returning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// Tasks submitted
    pub launched: usize,
    /// Indices of tasks known to have finished, in completion order
    pub finished: Vec<usize>,
    /// Finished tasks that failed or panicked
    pub failed: Vec<usize>,
}

impl JoinSummary {
    fn collect(launched: usize, done: impl IntoIterator<Item = (usize, bool)>) -> Self {
        let mut summary = JoinSummary {
            launched,
            ..Default::default()
        };
        for (index, ok) in done {
            summary.finished.push(index);
            if !ok {
                summary.failed.push(index);
            }
        }
        summary
    }

    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A fixed number of worker threads draining a shared queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Runs `tasks` with at most `capacity` of them in flight.
    ///
    /// With [`JoinPolicy::First`] the call returns once any task completes.
    /// Workers are detached, so queued and running tasks still complete
    /// afterwards.
    pub fn run(&self, tasks: Vec<Task>, policy: JoinPolicy) -> JoinSummary {
        let launched = tasks.len();
        if launched == 0 {
            return JoinSummary::default();
        }

        let queue: Arc<Mutex<VecDeque<(usize, Task)>>> =
            Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
        let (tx, rx) = mpsc::channel::<(usize, bool)>();

        let workers = self.capacity.min(launched);
        let mut spawned = 0;
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let handle = thread::Builder::new()
                .name(format!("branch-worker-{}", worker))
                .spawn(move || drain(&queue, &tx));
            match handle {
                Ok(_) => spawned += 1,
                Err(e) => warn!("Failed to start branch worker {}: {}", worker, e),
            }
        }
        drop(tx);

        if spawned == 0 {
            warn!("No branch workers could be started, running {} task(s) inline", launched);
            let (tx, rx) = mpsc::channel::<(usize, bool)>();
            drain(&queue, &tx);
            drop(tx);
            return JoinSummary::collect(launched, rx.iter());
        }

        debug!("Started {} worker(s) for {} task(s)", spawned, launched);

        match policy {
            JoinPolicy::All => JoinSummary::collect(launched, rx.iter()),
            JoinPolicy::First => JoinSummary::collect(launched, rx.recv()),
        }
    }
}

fn drain(queue: &Mutex<VecDeque<(usize, Task)>>, done: &mpsc::Sender<(usize, bool)>) {
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some((index, task)) = next else {
            break;
        };

        let ok = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|_| {
            error!("Branch {} panicked", index);
            false
        });
        // The coordinator may have stopped listening
        let _ = done.send((index, ok));
    }
}

/// One body to run in parallel, with an optional variable bound before it starts.
#[derive(Debug, Clone)]
pub struct Branch {
    pub steps: Arc<[Step]>,
    pub binding: Option<(String, Value)>,
}

impl Dispatcher {
    /// Runs `branches` on a worker pool.
    ///
    /// Each branch gets a context derived from `ctx` by `policy`, has its
    /// binding applied, then runs its steps sequentially in [`Scope::Branch`].
    pub fn coordinate(
        &self,
        branches: Vec<Branch>,
        ctx: &Context,
        policy: ContextPolicy,
        join: JoinPolicy,
        capacity: usize,
    ) -> JoinSummary {
        let tasks: Vec<Task> = branches
            .into_iter()
            .enumerate()
            .map(|(index, branch)| {
                let branch_ctx = policy.apply(ctx);
                if let Some((name, value)) = branch.binding {
                    branch_ctx.set(name, value);
                }
                let steps = branch.steps;
                let dispatcher = self.clone();
                Box::new(move || {
                    debug!("Branch {} started", index);
                    let outcome = dispatcher.run_steps(&steps, &branch_ctx, Scope::Branch);
                    debug!("Branch {} finished", index);
                    outcome.succeeded
                }) as Task
            })
            .collect();

        WorkerPool::new(capacity).run(tasks, join)
    }

    pub(crate) fn run_parallel_for_each(
        &self,
        list: &Value,
        item_variable: &str,
        steps: &[Step],
        max_workers: Option<usize>,
        ctx: &Context,
    ) -> Result<StepOutcome, StepError> {
        let items = resolve_list(list, ctx)?;
        let capacity = self.capacity(max_workers);
        info!(
            "Running {} item(s) in parallel with up to {} worker(s)",
            items.len(),
            capacity
        );

        let body: Arc<[Step]> = Arc::from(steps);
        let branches = items
            .into_iter()
            .map(|item| Branch {
                steps: Arc::clone(&body),
                binding: Some((item_variable.to_string(), item)),
            })
            .collect();

        let summary = self.coordinate(branches, ctx, ContextPolicy::Isolated, JoinPolicy::All, capacity);
        info!(
            "Parallel for-each finished {}/{} item(s)",
            summary.finished.len(),
            summary.launched
        );
        Ok(branch_outcome(&summary))
    }

    pub(crate) fn run_parallel_branches(
        &self,
        branches: &[Vec<Step>],
        max_workers: Option<usize>,
        join: JoinPolicy,
        ctx: &Context,
    ) -> StepOutcome {
        let capacity = self.capacity(max_workers);
        let branches: Vec<Branch> = branches
            .iter()
            .map(|steps| Branch {
                steps: Arc::from(steps.as_slice()),
                binding: None,
            })
            .collect();

        info!(
            "Running {} branch(es) with up to {} worker(s)",
            branches.len(),
            capacity
        );

        let summary = self.coordinate(branches, ctx, ContextPolicy::Shared, join, capacity);
        match join {
            JoinPolicy::All => info!("All {} branch(es) finished", summary.launched),
            JoinPolicy::First => match summary.finished.first() {
                Some(index) => info!(
                    "Branch {} finished first, {} other branch(es) continue in the background",
                    index,
                    summary.launched - 1
                ),
                None => info!("No branches to run"),
            },
        }
        branch_outcome(&summary)
    }
}

fn branch_outcome(summary: &JoinSummary) -> StepOutcome {
    if summary.succeeded() {
        StepOutcome::next()
    } else {
        warn!("{} branch(es) reported failures", summary.failed.len());
        StepOutcome::failed()
    }
}
