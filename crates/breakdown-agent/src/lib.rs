//! Task breakdown workflows.
//!
//! A task is decomposed into subtasks, the subtasks are handed to agents
//! coordinated by one of four [`Pattern`]s, and the agents' results are
//! merged into one final result. Each pattern is a [`WorkflowGraph`] of
//! steps run by the [`GraphExecutor`].

pub mod graph;
pub mod orchestrator;
pub mod patterns;
pub mod services;
pub mod steps;

pub use graph::{ExecutionResult, GraphBuilder, GraphExecutor, JoinPolicy, SharedState, Step, WorkflowGraph};
pub use orchestrator::Orchestrator;
pub use patterns::{build_graph, Pattern, PatternInfo, PatternOptions};
pub use services::Services;
