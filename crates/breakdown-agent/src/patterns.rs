//! The four coordination patterns and the graphs they build.
//!
//! | Pattern | Shape |
//! |---|---|
//! | `parallel_unreliable` | decompose, isolated agents fanned out, join, merge |
//! | `parallel_shared` | as above, agents share `context` without synchronization |
//! | `sequential_reliable` | decompose, agents in a chain building `context`, merge |
//! | `sequential_compressed` | as above with a compression step after every agent |
//!
//! The sequential patterns have memory-enhanced variants that retrieve facts
//! and episodes first and store the run as an episode last.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use breakdown_core::config::{MemoryConfig, OrchestratorConfig};
use breakdown_core::error::{BreakdownError, Result};

use crate::graph::{
    results_ready, GraphBuilder, JoinPolicy, WorkflowGraph, DEFAULT_MAX_VISITS, END, MERGE_LABEL,
    WAIT_LABEL,
};
use crate::steps::{
    AgentMode, AgentStep, CompressStep, DecomposeStep, MergeContext, MergeStep,
    RetrieveMemoryStep, UpdateMemoryStep,
};

pub const TASK_BREAKER: &str = "task_breaker";
pub const MERGER: &str = "merger";
pub const COMPRESS_FINAL: &str = "compress_final";
pub const MEMORY_RETRIEVAL: &str = "memory_retrieval";
pub const MEMORY_UPDATE: &str = "memory_update";

pub const MAX_AGENTS: usize = 3;

pub fn agent_node(id: usize) -> String {
    format!("agent_{}", id)
}

/// Compression after agent `id`; the last agent's is `compress_final`.
pub fn compress_node(id: usize, agents: usize) -> String {
    if id == agents {
        COMPRESS_FINAL.to_string()
    } else {
        format!("compress_{}", id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    ParallelUnreliable,
    ParallelShared,
    SequentialReliable,
    SequentialCompressed,
}

/// Descriptive metadata for a pattern. Never consulted by execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub memory: &'static str,
    pub coordination: &'static str,
    pub reliability: &'static str,
}

static PATTERN_INFO: [PatternInfo; 4] = [
    PatternInfo {
        name: "Parallel Agents (Unreliable)",
        description: "Parallel execution with isolated agents",
        memory: "Isolated per agent",
        coordination: "None",
        reliability: "Low - race conditions possible",
    },
    PatternInfo {
        name: "Parallel with Shared Context",
        description: "Parallel execution with shared memory",
        memory: "Shared conversation buffer",
        coordination: "Minimal",
        reliability: "Low - timing issues possible",
    },
    PatternInfo {
        name: "Sequential Agents (Reliable)",
        description: "Linear sequential execution",
        memory: "Cumulative context building",
        coordination: "Full",
        reliability: "High - deterministic",
    },
    PatternInfo {
        name: "Sequential with Compression",
        description: "Sequential with memory optimization",
        memory: "Compressed context + vector retrieval",
        coordination: "Full with memory management",
        reliability: "High - scalable",
    },
];

impl Pattern {
    pub const ALL: [Pattern; 4] = [
        Pattern::ParallelUnreliable,
        Pattern::ParallelShared,
        Pattern::SequentialReliable,
        Pattern::SequentialCompressed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::ParallelUnreliable => "parallel_unreliable",
            Pattern::ParallelShared => "parallel_shared",
            Pattern::SequentialReliable => "sequential_reliable",
            Pattern::SequentialCompressed => "sequential_compressed",
        }
    }

    pub fn info(&self) -> &'static PatternInfo {
        match self {
            Pattern::ParallelUnreliable => &PATTERN_INFO[0],
            Pattern::ParallelShared => &PATTERN_INFO[1],
            Pattern::SequentialReliable => &PATTERN_INFO[2],
            Pattern::SequentialCompressed => &PATTERN_INFO[3],
        }
    }

    /// Whether agents run as concurrent branches.
    pub fn is_parallel(&self) -> bool {
        matches!(self, Pattern::ParallelUnreliable | Pattern::ParallelShared)
    }

    /// Whether the graph needs a long-term context store.
    pub fn needs_context_store(&self) -> bool {
        matches!(self, Pattern::SequentialCompressed)
    }
}

impl FromStr for Pattern {
    type Err = BreakdownError;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| BreakdownError::UnknownPattern(s.to_string()))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape parameters shared by every pattern builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternOptions {
    pub agents: usize,
    pub memory: bool,
    pub join: JoinPolicy,
    pub user_id: String,
    pub fact_k: usize,
    pub episode_k: usize,
    pub history_k: usize,
    pub max_step_visits: usize,
}

impl Default for PatternOptions {
    fn default() -> Self {
        let memory = MemoryConfig::default();
        Self {
            agents: 2,
            memory: false,
            join: JoinPolicy::Atomic,
            user_id: memory.user_id,
            fact_k: memory.fact_k,
            episode_k: memory.episode_k,
            history_k: memory.history_k,
            max_step_visits: DEFAULT_MAX_VISITS,
        }
    }
}

impl PatternOptions {
    pub fn from_config(orchestrator: &OrchestratorConfig, memory: &MemoryConfig) -> Self {
        Self {
            agents: orchestrator.agents,
            memory: orchestrator.memory_enhanced,
            join: if orchestrator.racy_join {
                JoinPolicy::Racy
            } else {
                JoinPolicy::Atomic
            },
            user_id: memory.user_id.clone(),
            fact_k: memory.fact_k,
            episode_k: memory.episode_k,
            history_k: memory.history_k,
            max_step_visits: orchestrator.max_step_visits,
        }
    }

    pub fn with_agents(mut self, agents: usize) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_memory(mut self, memory: bool) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }
}

/// Build the workflow graph for `pattern`.
pub fn build_graph(pattern: Pattern, opts: &PatternOptions) -> Result<WorkflowGraph> {
    if !(1..=MAX_AGENTS).contains(&opts.agents) {
        return Err(BreakdownError::Config(format!(
            "agent count must be between 1 and {}, got {}",
            MAX_AGENTS, opts.agents
        )));
    }
    if opts.memory && pattern.is_parallel() {
        return Err(BreakdownError::Config(format!(
            "pattern {} has no memory-enhanced variant",
            pattern
        )));
    }

    let mut b = GraphBuilder::new();
    match pattern {
        Pattern::ParallelUnreliable => parallel(&mut b, opts, AgentMode::Isolated, MergeContext::None),
        Pattern::ParallelShared => parallel(&mut b, opts, AgentMode::Shared, MergeContext::Context),
        Pattern::SequentialReliable => sequential(&mut b, pattern, opts, false),
        Pattern::SequentialCompressed => sequential(&mut b, pattern, opts, true),
    }
    b.build()
}

fn parallel(b: &mut GraphBuilder, opts: &PatternOptions, mode: AgentMode, merge: MergeContext) {
    b.add_step(TASK_BREAKER, Arc::new(DecomposeStep::new()))
        .add_step(MERGER, Arc::new(MergeStep::new(merge)))
        .set_entry(TASK_BREAKER)
        .add_edge(MERGER, END);

    for id in 1..=opts.agents {
        let node = agent_node(id);
        b.add_step(node.as_str(), Arc::new(AgentStep::new(id, mode)))
            .add_edge(TASK_BREAKER, node.as_str());
        match opts.join {
            JoinPolicy::Atomic => {
                b.add_join(node.as_str(), MERGER);
            }
            JoinPolicy::Racy => {
                b.add_conditional_edge(
                    node.as_str(),
                    results_ready(opts.agents),
                    [(MERGE_LABEL, MERGER), (WAIT_LABEL, END)],
                );
            }
        }
    }
}

fn sequential(b: &mut GraphBuilder, pattern: Pattern, opts: &PatternOptions, compressed: bool) {
    if opts.memory {
        let retrieve = RetrieveMemoryStep::new(opts.user_id.clone(), opts.fact_k, opts.episode_k);
        b.add_step(MEMORY_RETRIEVAL, Arc::new(retrieve))
            .set_entry(MEMORY_RETRIEVAL)
            .add_step(TASK_BREAKER, Arc::new(DecomposeStep::with_memory()))
            .add_edge(MEMORY_RETRIEVAL, TASK_BREAKER);
    } else {
        b.add_step(TASK_BREAKER, Arc::new(DecomposeStep::new()))
            .set_entry(TASK_BREAKER);
    }
    let mut prev = TASK_BREAKER.to_string();

    let mode = if compressed {
        AgentMode::Compressed
    } else {
        AgentMode::Sequential
    };
    for id in 1..=opts.agents {
        let node = agent_node(id);
        let agent = AgentStep::new(id, mode)
            .with_memory(opts.memory)
            .with_history_k(opts.history_k);
        b.add_step(node.as_str(), Arc::new(agent))
            .add_edge(prev.as_str(), node.as_str());
        prev = node;

        if compressed {
            let node = compress_node(id, opts.agents);
            let step = if opts.memory {
                CompressStep::with_memory()
            } else {
                CompressStep::new()
            };
            b.add_step(node.as_str(), Arc::new(step))
                .add_edge(prev.as_str(), node.as_str());
            prev = node;
        }
    }

    let merge = match (opts.memory, compressed) {
        (_, true) => MergeStep::new(MergeContext::Compressed),
        (true, false) => MergeStep::with_memory(),
        (false, false) => MergeStep::new(MergeContext::Context),
    };
    b.add_step(MERGER, Arc::new(merge))
        .add_edge(prev.as_str(), MERGER);

    if opts.memory {
        b.add_step(MEMORY_UPDATE, Arc::new(UpdateMemoryStep::new(pattern.as_str())))
            .add_edge(MERGER, MEMORY_UPDATE)
            .add_edge(MEMORY_UPDATE, END);
    } else {
        b.add_edge(MERGER, END);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Route;

    fn direct(graph: &WorkflowGraph, from: &str) -> Vec<String> {
        match graph.route(from) {
            Some(Route::Direct(targets)) => targets.clone(),
            other => panic!("expected direct route from {}, got {:?}", from, other),
        }
    }

    #[test]
    fn test_names_round_trip() {
        for p in Pattern::ALL {
            assert_eq!(p.as_str().parse::<Pattern>().unwrap(), p);
            assert_eq!(p.to_string(), p.as_str());
        }
    }

    #[test]
    fn test_unknown_pattern() {
        let err = "round_robin".parse::<Pattern>().unwrap_err();
        assert!(matches!(err, BreakdownError::UnknownPattern(ref n) if n == "round_robin"));
    }

    #[test]
    fn test_info_table() {
        let info = Pattern::SequentialCompressed.info();
        assert_eq!(info.name, "Sequential with Compression");
        assert_eq!(info.memory, "Compressed context + vector retrieval");
        assert_eq!(Pattern::ParallelUnreliable.info().reliability, "Low - race conditions possible");
        assert_eq!(Pattern::SequentialReliable.info().coordination, "Full");
    }

    #[test]
    fn test_parallel_fans_out_and_joins() {
        let graph = build_graph(Pattern::ParallelUnreliable, &PatternOptions::default()).unwrap();
        assert_eq!(graph.entry(), TASK_BREAKER);
        assert_eq!(direct(&graph, TASK_BREAKER), vec!["agent_1", "agent_2"]);
        assert_eq!(graph.join_arity().get(MERGER), Some(&2));
        assert_eq!(direct(&graph, MERGER), vec![END]);
    }

    #[test]
    fn test_racy_parallel_uses_predicate() {
        let opts = PatternOptions::default().with_join(JoinPolicy::Racy).with_agents(3);
        let graph = build_graph(Pattern::ParallelShared, &opts).unwrap();
        for id in 1..=3 {
            assert!(matches!(
                graph.route(&agent_node(id)),
                Some(Route::Conditional { targets, .. }) if targets.get(MERGE_LABEL).map(String::as_str) == Some(MERGER)
            ));
        }
        assert!(graph.join_arity().is_empty());
    }

    #[test]
    fn test_sequential_chain() {
        let graph = build_graph(Pattern::SequentialReliable, &PatternOptions::default()).unwrap();
        assert_eq!(direct(&graph, TASK_BREAKER), vec!["agent_1"]);
        assert_eq!(direct(&graph, "agent_1"), vec!["agent_2"]);
        assert_eq!(direct(&graph, "agent_2"), vec![MERGER]);
        assert_eq!(direct(&graph, MERGER), vec![END]);
    }

    #[test]
    fn test_compressed_chain() {
        let graph = build_graph(Pattern::SequentialCompressed, &PatternOptions::default()).unwrap();
        assert_eq!(direct(&graph, "agent_1"), vec!["compress_1"]);
        assert_eq!(direct(&graph, "compress_1"), vec!["agent_2"]);
        assert_eq!(direct(&graph, "agent_2"), vec![COMPRESS_FINAL]);
        assert_eq!(direct(&graph, COMPRESS_FINAL), vec![MERGER]);
    }

    #[test]
    fn test_memory_variant_wraps_chain() {
        let opts = PatternOptions::default().with_memory(true);
        let graph = build_graph(Pattern::SequentialCompressed, &opts).unwrap();
        assert_eq!(graph.entry(), MEMORY_RETRIEVAL);
        assert_eq!(direct(&graph, MEMORY_RETRIEVAL), vec![TASK_BREAKER]);
        assert_eq!(direct(&graph, MERGER), vec![MEMORY_UPDATE]);
        assert_eq!(direct(&graph, MEMORY_UPDATE), vec![END]);
    }

    #[test]
    fn test_memory_on_parallel_rejected() {
        let opts = PatternOptions::default().with_memory(true);
        for p in [Pattern::ParallelUnreliable, Pattern::ParallelShared] {
            assert!(matches!(build_graph(p, &opts), Err(BreakdownError::Config(_))));
        }
    }

    #[test]
    fn test_agent_count_bounds() {
        for agents in [0, 4] {
            let opts = PatternOptions::default().with_agents(agents);
            assert!(build_graph(Pattern::SequentialReliable, &opts).is_err());
        }
        let one = PatternOptions::default().with_agents(1);
        let graph = build_graph(Pattern::ParallelUnreliable, &one).unwrap();
        assert_eq!(graph.join_arity().get(MERGER), Some(&1));
    }

    #[test]
    fn test_options_from_config() {
        let mut orchestrator = OrchestratorConfig::default();
        orchestrator.racy_join = true;
        orchestrator.agents = 3;
        let opts = PatternOptions::from_config(&orchestrator, &MemoryConfig::default());
        assert_eq!(opts.join, JoinPolicy::Racy);
        assert_eq!(opts.agents, 3);
        assert_eq!(opts.fact_k, 5);
    }
}
