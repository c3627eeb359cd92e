//! Workflow graph engine.
//!
//! A workflow is a directed graph of named [`Step`]s. Each step leaves by one
//! route: direct edges (several mean concurrent fan-out), a conditional edge
//! whose pure predicate picks a successor by label, or a join edge into an
//! atomic fan-in counter. [`END`] terminates a branch.
//!
//! The [`GraphExecutor`] walks the graph from the entry step against one
//! [`SharedState`], running forked branches as independent tokio tasks and
//! returning once every branch has ended.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod join;
pub mod state;
pub mod step;

pub use builder::{GraphBuilder, WorkflowGraph};
pub use edge::{results_ready, BranchId, Predicate, Route, END, MERGE_LABEL, WAIT_LABEL};
pub use executor::{BranchFailure, ExecutionResult, GraphExecutor, StepRecord, DEFAULT_MAX_VISITS};
pub use join::{JoinCounter, JoinPolicy, JoinTable};
pub use state::SharedState;
pub use step::{step_fn, FnStep, Step};
