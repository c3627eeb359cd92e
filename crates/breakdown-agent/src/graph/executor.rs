use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::event::{EventBus, WorkflowEvent};
use breakdown_core::state::TaskState;

use super::builder::WorkflowGraph;
use super::edge::{BranchId, Route, END};
use super::join::JoinTable;
use super::state::SharedState;
use crate::services::Services;

/// Visits of one step per run before the visiting branch is terminated.
pub const DEFAULT_MAX_VISITS: usize = 5;

/// Result of executing a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// Which step was executed.
    pub step: String,
    /// Branch the step ran on.
    pub branch: BranchId,
    /// Whether the step succeeded.
    pub succeeded: bool,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// A branch that stopped on an error.
#[derive(Debug)]
pub struct BranchFailure {
    pub step: String,
    pub branch: BranchId,
    pub error: BreakdownError,
}

/// Result of executing an entire graph.
#[derive(Debug)]
pub struct ExecutionResult {
    /// The state after every branch finished.
    pub state: TaskState,
    /// Per-step records in completion order.
    pub step_records: Vec<StepRecord>,
    /// Branches that ended on an error.
    pub failures: Vec<BranchFailure>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
    /// Whether no branch failed.
    pub succeeded: bool,
}

impl ExecutionResult {
    /// How many times `step` ran to completion.
    pub fn runs_of(&self, step: &str) -> usize {
        self.step_records
            .iter()
            .filter(|r| r.step == step && r.succeeded)
            .count()
    }
}

/// Runs a [`WorkflowGraph`] for one input state.
///
/// Starting from the entry step, each branch runs its step, then follows the
/// step's route: a single direct edge continues on the same branch, several
/// direct edges fork one new concurrent task per successor, a conditional
/// edge asks its predicate, and a join edge continues only on the branch
/// whose arrival completes the join. A branch ends at the sentinel, at a step
/// without outgoing edges, on a step error, or when a step exceeds its visit
/// limit. `execute` returns once every branch has ended.
pub struct GraphExecutor {
    graph: Arc<WorkflowGraph>,
    max_visits: usize,
    events: Option<Arc<EventBus>>,
}

struct RunContext {
    graph: Arc<WorkflowGraph>,
    services: Services,
    state: SharedState,
    joins: JoinTable,
    visits: Mutex<HashMap<String, usize>>,
    next_branch: AtomicUsize,
    records: Mutex<Vec<StepRecord>>,
    failures: Mutex<Vec<BranchFailure>>,
    events: Option<Arc<EventBus>>,
    max_visits: usize,
}

impl RunContext {
    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn visit(&self, step: &str) -> usize {
        let mut visits = self.visits.lock().unwrap_or_else(|e| e.into_inner());
        let n = visits.entry(step.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    fn record(&self, record: StepRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    fn fail(&self, step: &str, branch: BranchId, error: BreakdownError) {
        error!(step, branch, error = %error, "Branch failed");
        self.publish(WorkflowEvent::StepFailed {
            step: step.to_string(),
            branch,
            error: error.to_string(),
        });
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(BranchFailure {
                step: step.to_string(),
                branch,
                error,
            });
    }

    fn end_branch(&self, step: &str, branch: BranchId) {
        self.publish(WorkflowEvent::BranchEnded {
            step: step.to_string(),
            branch,
        });
    }
}

impl GraphExecutor {
    pub fn new(graph: Arc<WorkflowGraph>) -> Self {
        Self {
            graph,
            max_visits: DEFAULT_MAX_VISITS,
            events: None,
        }
    }

    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits.max(1);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Run the graph to completion from `initial`.
    pub async fn execute(&self, services: &Services, initial: TaskState) -> ExecutionResult {
        let start = Instant::now();
        let ctx = Arc::new(RunContext {
            graph: self.graph.clone(),
            services: services.clone(),
            state: SharedState::new(initial),
            joins: JoinTable::new(self.graph.join_arity()),
            visits: Mutex::new(HashMap::new()),
            next_branch: AtomicUsize::new(1),
            records: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            events: self.events.clone(),
            max_visits: self.max_visits,
        });

        run_branch(ctx.clone(), self.graph.entry().to_string(), 0).await;

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        let state = ctx.state.snapshot();
        let step_records = std::mem::take(&mut *ctx.records.lock().unwrap_or_else(|e| e.into_inner()));
        let failures = std::mem::take(&mut *ctx.failures.lock().unwrap_or_else(|e| e.into_inner()));
        let succeeded = failures.is_empty();

        info!(
            steps = step_records.len(),
            failures = failures.len(),
            merged = state.is_merged(),
            total_elapsed_ms,
            "Graph execution complete"
        );

        ExecutionResult {
            state,
            step_records,
            failures,
            total_elapsed_ms,
            succeeded,
        }
    }
}

fn run_branch(ctx: Arc<RunContext>, start: String, branch: BranchId) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let mut current = start;

        loop {
            if current == END {
                debug!(branch, "Branch reached the sentinel");
                ctx.end_branch(END, branch);
                return;
            }

            let visits = ctx.visit(&current);
            if visits > ctx.max_visits {
                warn!(
                    step = %current,
                    branch,
                    visits,
                    "Step visited more than {} times, terminating branch",
                    ctx.max_visits
                );
                ctx.end_branch(&current, branch);
                return;
            }

            let Some(step) = ctx.graph.step(&current).cloned() else {
                let err = BreakdownError::Graph(format!("step '{}' not found in graph", current));
                ctx.fail(&current, branch, err);
                return;
            };

            info!(step = %current, branch, "Executing step");
            ctx.publish(WorkflowEvent::StepStarted {
                step: current.clone(),
                branch,
            });

            let step_start = Instant::now();
            let outcome = step.run(&ctx.state, &ctx.services).await;
            let elapsed_ms = step_start.elapsed().as_millis() as u64;

            ctx.record(StepRecord {
                step: current.clone(),
                branch,
                succeeded: outcome.is_ok(),
                elapsed_ms,
            });

            if let Err(e) = outcome {
                ctx.fail(&current, branch, e);
                return;
            }

            ctx.publish(WorkflowEvent::StepCompleted {
                step: current.clone(),
                branch,
                elapsed_ms,
            });
            debug!(step = %current, branch, elapsed_ms, "Step complete");

            match next_hop(&ctx, &current, branch) {
                Ok(Hop::Continue(next)) => current = next,
                Ok(Hop::Fork(targets)) => {
                    fork(&ctx, &current, branch, targets).await;
                    return;
                }
                Ok(Hop::Stop) => {
                    ctx.end_branch(&current, branch);
                    return;
                }
                Err(e) => {
                    ctx.fail(&current, branch, e);
                    return;
                }
            }
        }
    })
}

enum Hop {
    Continue(String),
    Fork(Vec<String>),
    Stop,
}

fn next_hop(ctx: &RunContext, current: &str, branch: BranchId) -> Result<Hop> {
    let Some(route) = ctx.graph.route(current) else {
        debug!(step = %current, branch, "No outgoing edges, branch complete");
        return Ok(Hop::Stop);
    };

    match route {
        Route::Direct(targets) if targets.len() == 1 => Ok(Hop::Continue(targets[0].clone())),
        Route::Direct(targets) => Ok(Hop::Fork(targets.clone())),
        Route::Conditional { predicate, targets } => {
            let label = ctx.state.read(|s| predicate(s, branch));
            debug!(step = %current, branch, label = %label, "Predicate evaluated");
            match targets.get(&label) {
                Some(next) => Ok(Hop::Continue(next.clone())),
                None => Err(BreakdownError::Graph(format!(
                    "predicate on '{}' returned unmapped label '{}'",
                    current, label
                ))),
            }
        }
        Route::Join { to } => {
            if ctx.joins.arrive(to) {
                debug!(step = %current, branch, join = %to, "Join complete, continuing");
                Ok(Hop::Continue(to.clone()))
            } else {
                debug!(
                    step = %current,
                    branch,
                    join = %to,
                    arrived = ctx.joins.arrivals(to),
                    "Waiting at join, ending branch"
                );
                Ok(Hop::Stop)
            }
        }
    }
}

async fn fork(ctx: &Arc<RunContext>, current: &str, parent: BranchId, targets: Vec<String>) {
    let mut set = JoinSet::new();
    for target in targets {
        let id = ctx.next_branch.fetch_add(1, Ordering::Relaxed);
        debug!(step = %current, parent, branch = id, target = %target, "Forking branch");
        set.spawn(run_branch(ctx.clone(), target, id));
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            // Panicked or cancelled child; its failure has no step error to report
            let err = BreakdownError::Graph(format!("branch task aborted: {}", e));
            ctx.fail(current, parent, err);
        }
    }
}
