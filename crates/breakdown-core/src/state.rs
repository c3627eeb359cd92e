use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::EpisodeExample;

/// Step label of a freshly created state.
pub const STEP_START: &str = "start";

/// The record threaded through every step of one run.
///
/// One `TaskState` is created per `execute` call and returned to the caller
/// at the terminal sentinel. Patterns that do not use memory leave `memory`
/// as `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskState {
    /// Original request. Never changes after creation.
    pub task: String,
    /// Written once by decomposition.
    pub subtasks: Vec<String>,
    /// Agent id ("1", "2", ...) to result text.
    pub sub_results: BTreeMap<String, String>,
    /// Accumulated working context.
    pub context: String,
    /// Bounded summary of `context`, overwritten on each compression.
    pub compressed_context: String,
    /// Set by the merge step and only by it.
    pub final_result: String,
    /// Label of the last completed unit.
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryState>,
}

impl TaskState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            step: STEP_START.to_string(),
            ..Default::default()
        }
    }

    /// Attach the memory extension used by memory-enhanced patterns.
    pub fn with_memory(mut self, memory: MemoryState) -> Self {
        self.memory = Some(memory);
        self
    }

    /// The subtask assigned to a 1-based agent id, if decomposition produced one.
    pub fn subtask_for(&self, agent_id: &str) -> Option<&str> {
        let index = agent_id.parse::<usize>().ok()?.checked_sub(1)?;
        self.subtasks.get(index).map(String::as_str)
    }

    /// Whether the merge step has run.
    pub fn is_merged(&self) -> bool {
        !self.final_result.is_empty()
    }
}

/// Memory fields carried only by memory-enhanced runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryState {
    pub user_id: String,
    pub session_id: String,
    /// Facts retrieved once at the start of the run.
    pub semantic_facts: Vec<String>,
    /// Similar successful episodes retrieved once at the start of the run.
    pub episodic_examples: Vec<EpisodeExample>,
    /// Actions recorded during this run, stored as an episode at the end.
    pub current_episode_actions: Vec<String>,
    /// Explicit user verdict on the outcome, when one is known.
    #[serde(default)]
    pub feedback: Option<bool>,
}

impl MemoryState {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Facts as a bulleted block for prompts.
    pub fn facts_block(&self) -> String {
        self.semantic_facts
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Episodic examples as numbered few-shot blocks for prompts.
    pub fn examples_block(&self) -> String {
        let mut out = String::new();
        for (i, ex) in self.episodic_examples.iter().enumerate() {
            out.push_str(&format!(
                "Example {}:\nTask: {}\nActions: {}\nResult: {}\nSuccess: {}\n\n",
                i + 1,
                ex.prior_task,
                ex.actions.join(" -> "),
                ex.outcome,
                ex.success
            ));
        }
        out
    }
}
